//! JSON frames exchanged over the gateway socket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`.

use crate::domain::message::Message;
use crate::domain::receipt::{DeliveryStatus, ReadStatus, ReceiptStatus};
use crate::error::AppError;
use axum::extract::ws::Message as WsMessage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinUser(JoinUser),
    ChatMessage(ChatMessage),
    MessageDelivered(DeliveryReceipt),
    MessageRead(ReadReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinUser {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub data: ChatMessageData,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageData {
    pub receiver_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub status: ReceiptStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub status: ReceiptStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    pub token: String,
}

impl ClientEvent {
    /// # Errors
    /// Returns the serde error if the frame is not a known event.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::JoinUser(e) => &e.token,
            Self::ChatMessage(e) => &e.token,
            Self::MessageDelivered(e) => &e.token,
            Self::MessageRead(e) => &e.token,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinUser(_) => "join-user",
            Self::ChatMessage(_) => "chat-message",
            Self::MessageDelivered(_) => "message-delivered",
            Self::MessageRead(_) => "message-read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserJoined {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    MessageSent {
        message: Message,
    },
    NewMessage {
        message: Message,
    },
    MessageDeliveryStatus(DeliveryStatus),
    MessageReadStatus(ReadStatus),
    Error(ErrorPayload),
}

impl ServerEvent {
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { code: code.to_string(), message: message.into() })
    }

    /// Encodes the event as a text frame.
    ///
    /// # Errors
    /// Returns the serde error if encoding fails.
    pub fn to_ws(&self) -> Result<WsMessage, serde_json::Error> {
        serde_json::to_string(self).map(|json| WsMessage::Text(json.into()))
    }
}

impl From<&AppError> for ServerEvent {
    fn from(err: &AppError) -> Self {
        Self::error(err.code(), err.public_message())
    }
}
