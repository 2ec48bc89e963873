use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::messaging::{HistoryQuery, SendMessage};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Stores a message for `receiver_id` and wakes their joined connections.
///
/// # Errors
/// Returns `AppError::BadRequest` if the content is invalid.
/// Returns `AppError::NotFound` if the receiver does not exist.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Json(payload): Json<SendMessage>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.send_message(auth_user.user_id, receiver_id, payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn history(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let messages = state.message_service.history(auth_user.user_id, peer_id, query.cursor(), query.limit).await?;
    Ok(Json(messages))
}
