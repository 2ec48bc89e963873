use crate::adapters::MessageCursor;
use crate::services::gateway::Metrics;
use crate::services::gateway::protocol::ServerEvent;
use crate::services::message_service::MessageService;
use axum::extract::ws::Message as WsMessage;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

/// `MessagePump` pushes a user's undelivered messages to one connection as `new-message` events.
///
/// Wake-ups are coalesced: while a sweep is running at most one further wake-up is queued.
/// Every sweep walks the whole undelivered backlog, because a message stamped earlier can be
/// committed after a later one. Ids already pushed on this connection are skipped, and they are
/// forgotten once a sweep no longer sees them (the message was delivered).
#[derive(Debug)]
pub(crate) struct MessagePump {
    notify_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl MessagePump {
    pub(crate) fn new(
        user_id: Uuid,
        message_service: MessageService,
        outbound_tx: mpsc::Sender<WsMessage>,
        metrics: Metrics,
        batch_limit: i64,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(1);

        let task = tokio::spawn(
            async move {
                Self::run_background(user_id, notify_rx, message_service, outbound_tx, metrics, batch_limit).await;
            }
            .instrument(tracing::info_span!("message_pump", user_id = %user_id)),
        );

        Self { notify_tx, task }
    }

    pub(crate) fn notify(&self) {
        let _ = self.notify_tx.try_send(());
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }

    async fn run_background(
        user_id: Uuid,
        mut rx: mpsc::Receiver<()>,
        message_service: MessageService,
        outbound_tx: mpsc::Sender<WsMessage>,
        metrics: Metrics,
        limit: i64,
    ) {
        let mut pushed = HashSet::new();

        while rx.recv().await.is_some() {
            let mut sweep = Sweep::default();
            let finished = loop {
                match Self::flush_batch(user_id, &message_service, &outbound_tx, &metrics, limit, &mut pushed, &mut sweep)
                    .await
                {
                    Ok(Flush::More) => {}
                    Ok(Flush::Drained) => break true,
                    Ok(Flush::Closed) => return,
                    Err(_) => break false,
                }
            };

            // Only a complete sweep proves which pushed messages left the backlog.
            if finished {
                pushed.retain(|id| sweep.seen.contains(id));
            }
        }
    }

    #[tracing::instrument(
        err(level = "debug"),
        skip(service, outbound_tx, metrics, pushed, sweep),
        fields(batch_count = tracing::field::Empty)
    )]
    async fn flush_batch(
        user_id: Uuid,
        service: &MessageService,
        outbound_tx: &mpsc::Sender<WsMessage>,
        metrics: &Metrics,
        limit: i64,
        pushed: &mut HashSet<Uuid>,
        sweep: &mut Sweep,
    ) -> crate::error::Result<Flush> {
        let messages = service.fetch_pending_batch(user_id, sweep.cursor, limit).await?;

        if messages.is_empty() {
            return Ok(Flush::Drained);
        }

        let batch_size = messages.len();
        tracing::Span::current().record("batch_count", batch_size);

        for message in messages {
            sweep.cursor = Some((message.created_at, message.id));
            sweep.seen.insert(message.id);
            if pushed.contains(&message.id) {
                continue;
            }

            let id = message.id;
            let frame = match (ServerEvent::NewMessage { message }).to_ws() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode new-message event");
                    pushed.insert(id);
                    continue;
                }
            };

            if outbound_tx.send(frame).await.is_err() {
                metrics.outbound_dropped_total.add(1, &[KeyValue::new("reason", "socket_closed")]);
                return Ok(Flush::Closed);
            }
            pushed.insert(id);
        }

        if batch_size >= usize::try_from(limit).unwrap_or(usize::MAX) { Ok(Flush::More) } else { Ok(Flush::Drained) }
    }
}

/// Position and visited ids of one pass over the undelivered backlog.
#[derive(Debug, Default)]
struct Sweep {
    cursor: Option<MessageCursor>,
    seen: HashSet<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    More,
    Drained,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::{MessageRepository, UserRepository};
    use crate::config::{MessagingConfig, NotificationConfig};
    use crate::domain::message::Message;
    use crate::services::notification_service::LocalNotificationService;
    use std::sync::Arc;
    use std::time::Duration;
    use time::OffsetDateTime;
    use tokio::sync::watch;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: MessageService,
        alice: Uuid,
        bob: Uuid,
        _shutdown: watch::Sender<bool>,
    }

    async fn setup(batch_limit: i64) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let alice = UserRepository::create(store.as_ref(), "alice", "hash").await.unwrap().id;
        let bob = UserRepository::create(store.as_ref(), "bob", "hash").await.unwrap().id;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let notifier = Arc::new(LocalNotificationService::new(
            &NotificationConfig { gc_interval_secs: 3600, user_channel_capacity: 16 },
            shutdown_rx,
        ));
        let config = MessagingConfig { max_content_length: 64, batch_limit, history_page_limit: 10 };
        let service = MessageService::new(store.clone(), store.clone(), notifier, config);
        Fixture { store, service, alice, bob, _shutdown: shutdown_tx }
    }

    async fn next_pushed(rx: &mut mpsc::Receiver<WsMessage>) -> Option<Uuid> {
        let frame = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.ok()??;
        let text = match frame {
            WsMessage::Text(text) => text,
            other => panic!("unexpected frame {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["event"], "new-message");
        value["data"]["message"]["id"].as_str().map(|id| id.parse().unwrap())
    }

    #[tokio::test]
    async fn test_message_committed_out_of_order_is_still_pushed() {
        let fx = setup(10).await;
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let pump = MessagePump::new(fx.bob, fx.service.clone(), outbound_tx, Metrics::new(), 10);

        let earlier = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        let later = Message::new(fx.alice, fx.bob, "later".into(), OffsetDateTime::now_utc());
        MessageRepository::create(fx.store.as_ref(), &later).await.unwrap();
        pump.notify();
        assert_eq!(next_pushed(&mut outbound_rx).await, Some(later.id));

        let stamped_first = Message::new(fx.alice, fx.bob, "earlier".into(), earlier);
        MessageRepository::create(fx.store.as_ref(), &stamped_first).await.unwrap();
        pump.notify();
        assert_eq!(next_pushed(&mut outbound_rx).await, Some(stamped_first.id));
        assert_eq!(next_pushed(&mut outbound_rx).await, None);

        pump.abort();
    }

    #[tokio::test]
    async fn test_backlog_larger_than_batch_is_pushed_once() {
        let fx = setup(2).await;
        for i in 0..5 {
            fx.service.send_message(fx.alice, fx.bob, format!("m{i}")).await.unwrap();
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let pump = MessagePump::new(fx.bob, fx.service.clone(), outbound_tx, Metrics::new(), 2);
        pump.notify();

        let mut ids = HashSet::new();
        while let Some(id) = next_pushed(&mut outbound_rx).await {
            assert!(ids.insert(id), "message {id} pushed twice");
        }
        assert_eq!(ids.len(), 5);

        pump.notify();
        assert_eq!(next_pushed(&mut outbound_rx).await, None);

        pump.abort();
    }
}
