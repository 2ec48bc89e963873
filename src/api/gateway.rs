use crate::api::AppState;
use crate::domain::auth::bearer_token;
use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{Extensions, HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tower_http::request_id::RequestId;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Upgrades an authenticated client to the chat gateway.
///
/// The token comes from `?token=` or an `Authorization: Bearer` header.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    extensions: Extensions,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let request_id = extensions
        .get::<RequestId>()
        .map(|id| id.header_value().to_str().unwrap_or_default().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let token = params.token.or_else(|| {
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(bearer_token).map(str::to_string)
    });

    let Some(token) = token else {
        tracing::warn!("WebSocket handshake failed: missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.account_service.authenticate(&token).await {
        Ok(user_id) => {
            let gateway = state.gateway_service.clone();
            let shutdown_rx = state.shutdown_rx.clone();
            ws.on_upgrade(move |socket| async move {
                gateway.handle_socket(socket, user_id, request_id, shutdown_rx).await;
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed: invalid token");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
