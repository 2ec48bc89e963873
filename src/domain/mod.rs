pub mod auth;
pub mod message;
pub mod receipt;
pub mod user;
