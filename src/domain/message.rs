use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A chat message between two users together with its receipt state.
///
/// Receipt state only moves forward: undelivered, delivered, read. The
/// timestamps always satisfy `created_at <= delivered_at <= read_at` and are
/// kept at microsecond precision, the resolution Postgres stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub is_delivered: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Timestamps to persist when a read receipt is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTransition {
    pub delivered_at: OffsetDateTime,
    pub read_at: OffsetDateTime,
    /// The message had not been delivered yet; the read receipt delivers it too.
    pub newly_delivered: bool,
}

impl Message {
    #[must_use]
    pub fn new(sender_id: Uuid, receiver_id: Uuid, content: String, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            sender_id,
            receiver_id,
            is_delivered: false,
            delivered_at: None,
            read_at: None,
            created_at: truncate_to_micros(created_at),
        }
    }

    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Plans a delivery receipt. Returns `None` if the message is already delivered.
    #[must_use]
    pub fn plan_delivery(&self, reported: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.is_delivered {
            return None;
        }
        let now = truncate_to_micros(now);
        Some(clamp_timestamp(reported.unwrap_or(now), self.created_at, now))
    }

    /// Plans a read receipt. Returns `None` if the message is already read.
    #[must_use]
    pub fn plan_read(&self, reported: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<ReadTransition> {
        if self.is_read() {
            return None;
        }

        let now = truncate_to_micros(now);
        let reported_at = reported.unwrap_or(now);
        let (delivered_at, newly_delivered) = match (self.is_delivered, self.delivered_at) {
            (true, Some(at)) => (at, false),
            // Delivered flag without a timestamp: treat creation as the delivery instant.
            (true, None) => (self.created_at, false),
            (false, _) => (clamp_timestamp(reported_at, self.created_at, now), true),
        };

        Some(ReadTransition { delivered_at, read_at: clamp_timestamp(reported_at, delivered_at, now), newly_delivered })
    }

    pub fn apply_delivery(&mut self, delivered_at: OffsetDateTime) {
        if !self.is_delivered {
            self.is_delivered = true;
            self.delivered_at = Some(delivered_at);
        }
    }

    pub fn apply_read(&mut self, transition: ReadTransition) {
        self.apply_delivery(transition.delivered_at);
        if self.read_at.is_none() {
            self.read_at = Some(transition.read_at);
        }
    }
}

/// Drops the sub-microsecond part of an instant.
#[must_use]
pub fn truncate_to_micros(value: OffsetDateTime) -> OffsetDateTime {
    value.replace_nanosecond(value.nanosecond() / 1_000 * 1_000).unwrap_or(value)
}

/// Clamps a client-reported instant into `[floor, ceiling]`; the floor wins on clock skew.
fn clamp_timestamp(value: OffsetDateTime, floor: OffsetDateTime, ceiling: OffsetDateTime) -> OffsetDateTime {
    let value = truncate_to_micros(value);
    if value < floor || floor > ceiling {
        floor
    } else if value > ceiling {
        ceiling
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn message_at(created_at: OffsetDateTime) -> Message {
        Message::new(Uuid::new_v4(), Uuid::new_v4(), "hi".to_string(), created_at)
    }

    #[test]
    fn test_delivery_uses_reported_time_within_bounds() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let msg = message_at(now - Duration::seconds(10));
        let reported = now - Duration::seconds(5);

        assert_eq!(msg.plan_delivery(Some(reported), now), Some(reported));
        assert_eq!(msg.plan_delivery(None, now), Some(now));
    }

    #[test]
    fn test_delivery_is_clamped() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let created = now - Duration::seconds(10);
        let msg = message_at(created);

        assert_eq!(msg.plan_delivery(Some(created - Duration::hours(1)), now), Some(created));
        assert_eq!(msg.plan_delivery(Some(now + Duration::hours(1)), now), Some(now));
    }

    #[test]
    fn test_delivery_is_applied_once() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let mut msg = message_at(now - Duration::seconds(10));
        let at = msg.plan_delivery(None, now).unwrap();
        msg.apply_delivery(at);

        assert!(msg.is_delivered);
        assert_eq!(msg.delivered_at, Some(at));
        assert_eq!(msg.plan_delivery(None, now + Duration::seconds(1)), None);

        msg.apply_delivery(now + Duration::seconds(5));
        assert_eq!(msg.delivered_at, Some(at));
    }

    #[test]
    fn test_read_never_precedes_delivery() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let mut msg = message_at(now - Duration::seconds(10));
        let delivered = now - Duration::seconds(2);
        msg.apply_delivery(delivered);

        let plan = msg.plan_read(Some(now - Duration::seconds(8)), now).unwrap();
        assert_eq!(plan.read_at, delivered);
        assert_eq!(plan.delivered_at, delivered);
        assert!(!plan.newly_delivered);
    }

    #[test]
    fn test_read_before_delivery_delivers_first() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let mut msg = message_at(now - Duration::seconds(10));

        let plan = msg.plan_read(None, now).unwrap();
        assert!(plan.newly_delivered);
        assert_eq!(plan.delivered_at, now);
        assert_eq!(plan.read_at, now);

        msg.apply_read(plan);
        assert!(msg.is_delivered);
        assert!(msg.is_read());
        assert!(msg.delivered_at <= msg.read_at);
        assert_eq!(msg.plan_read(None, now), None);
        assert_eq!(msg.plan_delivery(None, now), None);
    }

    #[test]
    fn test_clamp_prefers_floor_on_skew() {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let floor = now + Duration::seconds(3);
        assert_eq!(clamp_timestamp(now, floor, now), floor);
    }

    #[test]
    fn test_timestamps_keep_microsecond_precision() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::seconds(100) + Duration::nanoseconds(123_456_400);
        let msg = message_at(now - Duration::seconds(10));
        assert_eq!(msg.created_at.nanosecond() % 1_000, 0);

        let plan = msg.plan_read(None, now).unwrap();
        assert_eq!(plan.delivered_at.nanosecond(), 123_456_000);
        assert_eq!(plan.read_at, plan.delivered_at);

        let reported = now - Duration::nanoseconds(999);
        assert_eq!(msg.plan_delivery(Some(reported), now).unwrap().nanosecond(), 123_455_000);
    }

    #[test]
    fn test_wire_shape() {
        let msg = message_at(OffsetDateTime::UNIX_EPOCH);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["is_delivered"], false);
        assert!(value["delivered_at"].is_null());
        assert!(value["read_at"].is_null());
        assert_eq!(value["created_at"], "1970-01-01T00:00:00Z");
        assert_eq!(value["content"], "hi");
    }
}
