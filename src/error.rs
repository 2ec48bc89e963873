use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Authentication failed")]
    AuthError,
    #[error("Not found")]
    NotFound,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Short machine-readable code used for gateway `error` events.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Internal => "internal",
            Self::AuthError => "unauthorized",
            Self::NotFound => "not-found",
            Self::BadRequest(_) => "bad-request",
            Self::Conflict(_) => "conflict",
        }
    }

    /// Message safe to show to a client. Server faults are never described.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal => "Internal server error".to_string(),
            Self::AuthError => "Unauthorized".to_string(),
            Self::NotFound => "Not found".to_string(),
            Self::BadRequest(msg) | Self::Conflict(msg) => msg.clone(),
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Self::Database(e) => tracing::error!(error = %e, "Database error"),
            Self::Internal => tracing::error!("Internal server error occurred"),
            Self::AuthError => tracing::debug!("Authentication failed"),
            Self::NotFound => tracing::debug!("Resource not found"),
            Self::BadRequest(msg) => tracing::debug!(message = %msg, "Bad request"),
            Self::Conflict(msg) => tracing::debug!(message = %msg, "Conflict"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let status = match &self {
            Self::Database(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthError => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
        };

        let body = Json(json!({
            "error": self.public_message()
        }));

        (status, body).into_response()
    }
}
