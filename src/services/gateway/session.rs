use crate::config::WsConfig;
use crate::domain::receipt::{ReceiptStatus, UserEvent};
use crate::error::{AppError, Result};
use crate::services::auth_service::AuthService;
use crate::services::gateway::protocol::{ClientEvent, ServerEvent};
use crate::services::gateway::{Metrics, message_pump::MessagePump};
use crate::services::message_service::MessageService;
use crate::services::notification_service::NotificationService;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) user_id: Uuid,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) message_service: MessageService,
    pub(crate) auth_service: AuthService,
    pub(crate) notifier: Arc<dyn NotificationService>,
    pub(crate) metrics: Metrics,
    pub(crate) config: WsConfig,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

/// Handles client events for one connection. The connection is joined once `channel` is set.
struct Dispatcher {
    user_id: Uuid,
    message_service: MessageService,
    auth_service: AuthService,
    notifier: Arc<dyn NotificationService>,
    channel: Option<broadcast::Receiver<UserEvent>>,
}

impl Dispatcher {
    /// Every event carries its own token; it must still be valid and belong to this connection's user.
    fn authenticate(&self, token: &str) -> Result<()> {
        if self.auth_service.verify_token(token)? == self.user_id { Ok(()) } else { Err(AppError::AuthError) }
    }

    async fn dispatch(&mut self, event: ClientEvent, pump: &MessagePump) -> Result<Option<ServerEvent>> {
        self.authenticate(event.token())?;

        if let ClientEvent::JoinUser(join) = &event {
            if join.user_id != self.user_id {
                tracing::warn!(requested = %join.user_id, "Join rejected: user mismatch");
                return Err(AppError::AuthError);
            }
            if self.channel.is_none() {
                self.channel = Some(self.notifier.subscribe(self.user_id).await);
                tracing::info!("User joined channel");
            }
            // Subscribed before fetching so nothing stored in between is missed.
            pump.notify();
            return Ok(Some(ServerEvent::UserJoined { user_id: self.user_id }));
        }

        if self.channel.is_none() {
            return Ok(Some(ServerEvent::error("not-joined", "Send join-user before other events")));
        }

        match event {
            ClientEvent::ChatMessage(chat) => {
                let message =
                    self.message_service.send_message(self.user_id, chat.data.receiver_id, chat.data.content).await?;
                Ok(Some(ServerEvent::MessageSent { message }))
            }
            ClientEvent::MessageDelivered(receipt) => {
                if receipt.status != ReceiptStatus::Delivered {
                    return Err(AppError::BadRequest("message-delivered requires status 'delivered'".into()));
                }
                self.message_service.acknowledge_delivery(self.user_id, receipt.message_id, receipt.delivered_at).await?;
                Ok(None)
            }
            ClientEvent::MessageRead(receipt) => {
                if receipt.status != ReceiptStatus::Read {
                    return Err(AppError::BadRequest("message-read requires status 'read'".into()));
                }
                self.message_service.acknowledge_read(self.user_id, receipt.message_id, receipt.read_at).await?;
                Ok(None)
            }
            ClientEvent::JoinUser(_) => Ok(None),
        }
    }

    /// Parses and dispatches one text frame, turning failures into `error` events.
    async fn handle_text(&mut self, text: &str, pump: &MessagePump, metrics: &Metrics) -> Option<ServerEvent> {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode client event");
                return Some(ServerEvent::error("invalid-event", e.to_string()));
            }
        };

        let name = event.name();
        metrics.events_received_total.add(1, &[KeyValue::new("event", name)]);

        match self.dispatch(event, pump).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(event = name, code = e.code(), "Client event rejected");
                e.log();
                Some(ServerEvent::from(&e))
            }
        }
    }
}

async fn next_user_event(
    channel: &mut Option<broadcast::Receiver<UserEvent>>,
) -> std::result::Result<UserEvent, broadcast::error::RecvError> {
    match channel {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = %Uuid::new_v4()
        )
    )]
    pub(crate) async fn run(self) {
        let Self { user_id, socket, message_service, auth_service, notifier, metrics, config, mut shutdown_rx, .. } =
            self;

        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(config.outbound_buffer_size.max(1));

        let message_pump = MessagePump::new(
            user_id,
            message_service.clone(),
            outbound_tx,
            metrics.clone(),
            message_service.batch_limit(),
        );

        let mut dispatcher = Dispatcher { user_id, message_service, auth_service, notifier, channel: None };

        let ping_interval = Duration::from_secs(config.ping_interval_secs.max(1));
        let idle_limit = ping_interval + Duration::from_secs(config.ping_timeout_secs);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                msg = ws_stream.next() => {
                    if matches!(msg, Some(Ok(_))) {
                        last_seen = Instant::now();
                    }
                    let reply = match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            dispatcher.handle_text(text.as_str(), &message_pump, &metrics).await
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::warn!("Received unexpected binary frame");
                            Some(ServerEvent::error("invalid-event", "Binary frames are not supported"))
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => None,
                        Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                    };

                    if let Some(reply) = reply
                        && !send_event(&mut ws_sink, &reply).await
                    {
                        break;
                    }
                }

                msg = outbound_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if ws_sink.send(msg).await.is_err() { break; }
                        }
                        None => break,
                    }
                }

                result = next_user_event(&mut dispatcher.channel) => {
                    let forward = match result {
                        Ok(UserEvent::MessageReceived) => {
                            message_pump.notify();
                            None
                        }
                        Ok(UserEvent::DeliveryStatus(status)) => Some(ServerEvent::MessageDeliveryStatus(status)),
                        Ok(UserEvent::ReadStatus(status)) => Some(ServerEvent::MessageReadStatus(status)),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Pending messages are recovered from storage; receipts in the gap are lost.
                            tracing::warn!(missed, "User channel lagged");
                            message_pump.notify();
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    if let Some(event) = forward
                        && !send_event(&mut ws_sink, &event).await
                    {
                        break;
                    }
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= idle_limit {
                        tracing::info!("Heartbeat timed out, closing WebSocket");
                        let _ = ws_sink
                            .send(WsMessage::Close(Some(CloseFrame {
                                code: close_code::POLICY,
                                reason: "Heartbeat timeout".into(),
                            })))
                            .await;
                        break;
                    }
                    if ws_sink.send(WsMessage::Ping(Bytes::new())).await.is_err() { break; }
                }
            }
        }

        let _ = ws_sink.close().await;
        message_pump.abort();

        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> bool
where
    S: futures::Sink<WsMessage> + Unpin,
{
    match event.to_ws() {
        Ok(frame) => sink.send(frame).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            true
        }
    }
}
