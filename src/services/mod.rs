pub mod account_service;
pub mod auth_service;
pub mod gateway;
pub mod health_service;
pub mod message_service;
pub mod notification_service;
