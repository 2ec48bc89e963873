pub(crate) mod message_pump;
pub mod protocol;
pub(crate) mod session;

use crate::config::WsConfig;
use crate::services::auth_service::AuthService;
use crate::services::gateway::session::Session;
use crate::services::message_service::MessageService;
use crate::services::notification_service::NotificationService;
use crate::telemetry::METER_NAME;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) outbound_dropped_total: Counter<u64>,
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) events_received_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            outbound_dropped_total: meter
                .u64_counter("friendsgo_websocket_outbound_dropped_total")
                .with_description("Total messages dropped because the connection went away")
                .build(),
            active_connections: meter
                .i64_up_down_counter("friendsgo_websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            events_received_total: meter
                .u64_counter("friendsgo_websocket_events_received_total")
                .with_description("Client events received, by event name")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayService {
    message_service: MessageService,
    auth_service: AuthService,
    notifier: Arc<dyn NotificationService>,
    config: WsConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        message_service: MessageService,
        auth_service: AuthService,
        notifier: Arc<dyn NotificationService>,
        config: WsConfig,
    ) -> Self {
        Self { message_service, auth_service, notifier, config, metrics: Metrics::new() }
    }

    /// Runs an authenticated connection until the client leaves, the heartbeat expires or the server shuts down.
    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let session = Session {
            user_id,
            request_id,
            socket,
            message_service: self.message_service.clone(),
            auth_service: self.auth_service.clone(),
            notifier: Arc::clone(&self.notifier),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            shutdown_rx,
        };

        session.run().await;
    }
}
