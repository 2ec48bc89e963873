use crate::adapters::{MessageCursor, MessageRepository, UserRepository};
use crate::config::MessagingConfig;
use crate::domain::message::Message;
use crate::domain::receipt::{DeliveryStatus, ReadStatus, UserEvent};
use crate::error::{AppError, Result};
use crate::services::notification_service::NotificationService;
use crate::telemetry::METER_NAME;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Receipts for the same message are serialized on one of these locks.
const RECEIPT_LOCK_STRIPES: usize = 64;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    receipts_total: Counter<u64>,
    fetch_batch_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            sent_total: meter
                .u64_counter("friendsgo_messages_sent_total")
                .with_description("Total messages accepted for delivery")
                .build(),
            receipts_total: meter
                .u64_counter("friendsgo_receipts_total")
                .with_description("Delivery and read receipts processed")
                .build(),
            fetch_batch_size: meter
                .u64_histogram("friendsgo_message_fetch_batch_size")
                .with_description("Number of messages fetched in a single batch")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn NotificationService>,
    config: MessagingConfig,
    receipt_locks: Arc<[Mutex<()>]>,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        notifier: Arc<dyn NotificationService>,
        config: MessagingConfig,
    ) -> Self {
        let receipt_locks = (0..RECEIPT_LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self { messages, users, notifier, config, receipt_locks, metrics: Metrics::new() }
    }

    /// Stores a chat message and wakes the receiver's connections.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` for empty, oversized or self-addressed messages.
    /// Returns `AppError::NotFound` if the receiver does not exist.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, content),
        fields(message_id = tracing::field::Empty)
    )]
    pub async fn send_message(&self, sender_id: Uuid, receiver_id: Uuid, content: String) -> Result<Message> {
        self.validate(sender_id, receiver_id, &content)?;

        if !self.users.exists(receiver_id).await? {
            return Err(AppError::NotFound);
        }

        let message = Message::new(sender_id, receiver_id, content, OffsetDateTime::now_utc());
        match self.messages.create(&message).await {
            Ok(stored) => {
                tracing::Span::current().record("message_id", tracing::field::display(stored.id));
                tracing::debug!("Message stored for delivery");
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "success")]);

                self.notifier.notify(receiver_id, UserEvent::MessageReceived).await;
                Ok(stored)
            }
            Err(e) => {
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "failure")]);
                Err(e)
            }
        }
    }

    fn validate(&self, sender_id: Uuid, receiver_id: Uuid, content: &str) -> Result<()> {
        if sender_id == receiver_id {
            return Err(AppError::BadRequest("Cannot send a message to yourself".into()));
        }
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("Message content is empty".into()));
        }
        if content.chars().count() > self.config.max_content_length {
            return Err(AppError::BadRequest(format!(
                "Message content exceeds {} characters",
                self.config.max_content_length
            )));
        }
        Ok(())
    }

    /// Held while a receipt is recorded and forwarded, so the sender sees the
    /// state changes of one message in the order they were stored.
    fn receipt_lock(&self, message_id: Uuid) -> &Mutex<()> {
        let stripe = usize::from(message_id.as_bytes()[15]) % self.receipt_locks.len();
        &self.receipt_locks[stripe]
    }

    /// Loads a message that `user_id` received.
    async fn received_message(&self, user_id: Uuid, message_id: Uuid) -> Result<Message> {
        match self.messages.find_by_id(message_id).await? {
            Some(message) if message.receiver_id == user_id => Ok(message),
            // Not revealing messages addressed to someone else.
            _ => Err(AppError::NotFound),
        }
    }

    /// Records a delivery receipt and forwards it to the sender.
    ///
    /// Returns `None` if the message was already delivered.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if `user_id` is not the receiver of the message.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn acknowledge_delivery(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        reported_at: Option<OffsetDateTime>,
    ) -> Result<Option<DeliveryStatus>> {
        let _guard = self.receipt_lock(message_id).lock().await;
        let message = self.received_message(user_id, message_id).await?;

        let Some(delivered_at) = message.plan_delivery(reported_at, OffsetDateTime::now_utc()) else {
            tracing::debug!("Duplicate delivery receipt ignored");
            return Ok(None);
        };

        if !self.messages.record_delivery(message_id, delivered_at).await? {
            return Ok(None);
        }

        self.metrics.receipts_total.add(1, &[KeyValue::new("status", "delivered")]);
        let status = DeliveryStatus::new(message_id, delivered_at);
        self.notifier.notify(message.sender_id, UserEvent::DeliveryStatus(status.clone())).await;
        Ok(Some(status))
    }

    /// Records a read receipt and forwards it to the sender, delivering the message first if needed.
    ///
    /// Returns `None` if the message was already read.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if `user_id` is not the receiver of the message.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn acknowledge_read(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        reported_at: Option<OffsetDateTime>,
    ) -> Result<Option<ReadStatus>> {
        let _guard = self.receipt_lock(message_id).lock().await;
        let message = self.received_message(user_id, message_id).await?;

        let Some(transition) = message.plan_read(reported_at, OffsetDateTime::now_utc()) else {
            tracing::debug!("Duplicate read receipt ignored");
            return Ok(None);
        };

        // The sender must observe delivery before read.
        if transition.newly_delivered && self.messages.record_delivery(message_id, transition.delivered_at).await? {
            self.metrics.receipts_total.add(1, &[KeyValue::new("status", "delivered")]);
            let status = DeliveryStatus::new(message_id, transition.delivered_at);
            self.notifier.notify(message.sender_id, UserEvent::DeliveryStatus(status)).await;
        }

        if !self.messages.record_read(message_id, transition).await? {
            return Ok(None);
        }

        let read_at = self
            .messages
            .find_by_id(message_id)
            .await?
            .and_then(|stored| stored.read_at)
            .unwrap_or(transition.read_at);

        self.metrics.receipts_total.add(1, &[KeyValue::new("status", "read")]);
        let status = ReadStatus::new(message_id, read_at);
        self.notifier.notify(message.sender_id, UserEvent::ReadStatus(status.clone())).await;
        Ok(Some(status))
    }

    /// Fetches a batch of undelivered messages for a receiver.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(err(level = "warn"), skip(self), fields(batch_limit = %limit))]
    pub async fn fetch_pending_batch(
        &self,
        receiver_id: Uuid,
        cursor: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.fetch_undelivered_batch(receiver_id, cursor, limit).await?;
        self.metrics.fetch_batch_size.record(messages.len() as u64, &[]);
        Ok(messages)
    }

    /// Pages through the conversation between two users, newest first.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn history(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<MessageCursor>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>> {
        let max = self.config.history_page_limit.max(1);
        let limit = limit.unwrap_or(max).clamp(1, max);
        self.messages.fetch_conversation(user_id, peer_id, before, limit).await
    }

    #[must_use]
    pub(crate) const fn batch_limit(&self) -> i64 {
        self.config.batch_limit
    }
}
