use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

/// Tells a sender that one of their messages reached the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub message_id: Uuid,
    pub status: ReceiptStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn new(message_id: Uuid, delivered_at: OffsetDateTime) -> Self {
        Self { message_id, status: ReceiptStatus::Delivered, delivered_at }
    }
}

/// Tells a sender that one of their messages was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStatus {
    pub message_id: Uuid,
    pub status: ReceiptStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub read_at: OffsetDateTime,
}

impl ReadStatus {
    #[must_use]
    pub const fn new(message_id: Uuid, read_at: OffsetDateTime) -> Self {
        Self { message_id, status: ReceiptStatus::Read, read_at }
    }
}

/// Events fanned out on a user's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    /// New messages are waiting in storage; connections should run their pump.
    MessageReceived,
    DeliveryStatus(DeliveryStatus),
    ReadStatus(ReadStatus),
}
