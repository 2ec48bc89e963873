use crate::adapters::database::DbPool;
use crate::telemetry::METER_NAME;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
struct Metrics {
    status: Gauge<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            status: meter
                .i64_gauge("friendsgo_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthService {
    pool: Option<DbPool>,
    db_timeout: Duration,
    metrics: Metrics,
}

impl HealthService {
    /// `pool` is `None` when running on in-memory storage, which is always ready.
    #[must_use]
    pub fn new(pool: Option<DbPool>, db_timeout_ms: u64) -> Self {
        Self { pool, db_timeout: Duration::from_millis(db_timeout_ms), metrics: Metrics::new() }
    }

    /// Checks database connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the database is unreachable.
    pub async fn check_db(&self) -> Result<(), String> {
        let Some(pool) = &self.pool else {
            self.metrics.status.record(1, &[KeyValue::new("component", "database")]);
            return Ok(());
        };

        match timeout(self.db_timeout, sqlx::query("SELECT 1").execute(pool)).await {
            Ok(Ok(_)) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "database")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err(format!("Database connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err("Database connection timed out".to_string())
            }
        }
    }

    /// Names the storage backend reported by the readiness probe.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        if self.pool.is_some() { "postgres" } else { "memory" }
    }
}
