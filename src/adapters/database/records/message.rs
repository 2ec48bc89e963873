use crate::domain::message::Message;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) receiver_id: Uuid,
    pub(crate) content: String,
    pub(crate) is_delivered: bool,
    pub(crate) delivered_at: Option<OffsetDateTime>,
    pub(crate) read_at: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            is_delivered: record.is_delivered,
            delivered_at: record.delivered_at,
            read_at: record.read_at,
            created_at: record.created_at,
        }
    }
}
