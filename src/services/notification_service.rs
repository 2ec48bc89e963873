use crate::config::NotificationConfig;
use crate::domain::receipt::UserEvent;
use crate::telemetry::METER_NAME;
use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sends_total: Counter<u64>,
    active_channels: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            sends_total: meter
                .u64_counter("friendsgo_notifications_sent_total")
                .with_description("Total notification send attempts")
                .build(),
            active_channels: meter
                .i64_up_down_counter("friendsgo_notification_channels")
                .with_description("Number of active user channels")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("friendsgo_notification_gc_duration_seconds")
                .with_description("Time taken to perform a single GC iteration")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("friendsgo_notification_channels_reclaimed_total")
                .with_description("Total number of stale channels reclaimed by GC")
                .build(),
        }
    }
}

#[async_trait]
pub trait NotificationService: Send + Sync + std::fmt::Debug {
    /// Joins the user's channel. Every event sent after this call is observed by the receiver.
    async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<UserEvent>;

    /// Fans an event out to every joined connection of the user.
    async fn notify(&self, user_id: Uuid, event: UserEvent);
}

/// Per-user broadcast channels living in this process.
#[derive(Debug)]
pub struct LocalNotificationService {
    channels: Arc<DashMap<Uuid, broadcast::Sender<UserEvent>>>,
    user_channel_capacity: usize,
    metrics: Metrics,
}

impl LocalNotificationService {
    /// Creates the hub and starts its channel garbage collector.
    #[must_use]
    pub fn new(config: &NotificationConfig, shutdown: watch::Receiver<bool>) -> Self {
        let channels = Arc::new(DashMap::new());
        let metrics = Metrics::new();

        tokio::spawn(
            Self::run_gc(Arc::clone(&channels), metrics.clone(), config.gc_interval_secs, shutdown)
                .instrument(tracing::info_span!("notification_gc")),
        );

        Self { channels, user_channel_capacity: config.user_channel_capacity.max(1), metrics }
    }

    async fn run_gc(
        channels: Arc<DashMap<Uuid, broadcast::Sender<UserEvent>>>,
        metrics: Metrics,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    let reclaimed = reclaim_idle(&channels);
                    metrics.gc_duration_seconds.record(start.elapsed().as_secs_f64(), &[]);
                    if reclaimed > 0 {
                        tracing::debug!(reclaimed, "Reclaimed idle user channels");
                        metrics.active_channels.add(-i64::try_from(reclaimed).unwrap_or(i64::MAX), &[]);
                        metrics.gc_reclaimed_total.add(reclaimed, &[]);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

fn reclaim_idle(channels: &DashMap<Uuid, broadcast::Sender<UserEvent>>) -> u64 {
    let mut reclaimed = 0;
    channels.retain(|_, sender| {
        let active = sender.receiver_count() > 0;
        if !active {
            reclaimed += 1;
        }
        active
    });
    reclaimed
}

#[async_trait]
impl NotificationService for LocalNotificationService {
    #[tracing::instrument(level = "debug", skip(self), fields(user_id = %user_id))]
    async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<UserEvent> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| {
                self.metrics.active_channels.add(1, &[]);
                let (tx, _rx) = broadcast::channel(self.user_channel_capacity);
                tx
            })
            .subscribe()
    }

    #[tracing::instrument(level = "debug", skip(self), fields(user_id = %user_id, event = ?event))]
    async fn notify(&self, user_id: Uuid, event: UserEvent) {
        let delivered = self.channels.get(&user_id).is_some_and(|tx| tx.send(event).is_ok());
        let status = if delivered { "sent" } else { "unrouted" };
        self.metrics.sends_total.add(1, &[KeyValue::new("status", status)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::receipt::DeliveryStatus;
    use time::OffsetDateTime;

    fn config() -> NotificationConfig {
        NotificationConfig { gc_interval_secs: 3600, user_channel_capacity: 8 }
    }

    #[tokio::test]
    async fn test_notify_reaches_all_subscribers() {
        let (_tx, shutdown) = watch::channel(false);
        let service = LocalNotificationService::new(&config(), shutdown);
        let user_id = Uuid::new_v4();

        let mut first = service.subscribe(user_id).await;
        let mut second = service.subscribe(user_id).await;

        let status = DeliveryStatus::new(Uuid::new_v4(), OffsetDateTime::now_utc());
        service.notify(user_id, UserEvent::DeliveryStatus(status.clone())).await;

        assert_eq!(first.recv().await.unwrap(), UserEvent::DeliveryStatus(status.clone()));
        assert_eq!(second.recv().await.unwrap(), UserEvent::DeliveryStatus(status));
    }

    #[tokio::test]
    async fn test_notify_is_scoped_to_user() {
        let (_tx, shutdown) = watch::channel(false);
        let service = LocalNotificationService::new(&config(), shutdown);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_rx = service.subscribe(alice).await;
        service.notify(bob, UserEvent::MessageReceived).await;

        assert!(matches!(alice_rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_idle_channels_are_reclaimed() {
        let (_tx, shutdown) = watch::channel(false);
        let service = LocalNotificationService::new(&config(), shutdown);
        let user_id = Uuid::new_v4();

        let rx = service.subscribe(user_id).await;
        assert_eq!(reclaim_idle(&service.channels), 0);

        drop(rx);
        assert_eq!(reclaim_idle(&service.channels), 1);
        assert!(service.channels.is_empty());
    }
}
