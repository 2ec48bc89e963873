use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    /// Only messages created strictly before this instant (RFC 3339).
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<OffsetDateTime>,
    /// Tie-breaker for messages sharing the `before` instant: the id of the last message seen.
    pub before_id: Option<Uuid>,
}

impl HistoryQuery {
    /// Without `before_id` every message at the `before` instant is excluded.
    #[must_use]
    pub fn cursor(&self) -> Option<(OffsetDateTime, Uuid)> {
        self.before.map(|at| (at, self.before_id.unwrap_or(Uuid::nil())))
    }
}
