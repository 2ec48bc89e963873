use crate::api::AppState;
use crate::domain::auth::bearer_token;
use crate::error::AppError;
use axum::{
    extract::FromRequestParts,
    http::{Request, header, request::Parts},
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

#[derive(Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts.headers.get(header::AUTHORIZATION).ok_or(AppError::AuthError)?;
        let auth_str = auth_header.to_str().map_err(|_| AppError::AuthError)?;
        let token = bearer_token(auth_str).ok_or(AppError::AuthError)?;

        let user_id = state.auth_service.verify_token(token)?;
        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        Ok(Self { user_id })
    }
}

/// Keeps a client-supplied `x-request-id` when present, otherwise generates a UUID.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuidOrHeader;

impl MakeRequestId for MakeRequestUuidOrHeader {
    fn make_request_id<B>(&mut self, request: &Request<B>) -> Option<RequestId> {
        if let Some(existing) = request.headers().get("x-request-id")
            && !existing.is_empty()
        {
            return Some(RequestId::new(existing.clone()));
        }

        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}
