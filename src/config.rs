use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub notifications: NotificationConfig,

    #[command(flatten)]
    pub websocket: WsConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "FRIENDSGO_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the public API and gateway
    #[arg(long, env = "FRIENDSGO_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for liveness and readiness probes
    #[arg(long, env = "FRIENDSGO_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Seconds to wait for open connections to drain during shutdown
    #[arg(long, env = "FRIENDSGO_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// Postgres connection URL. When unset, messages and users are kept in memory.
    #[arg(long = "database-url", env = "FRIENDSGO_DATABASE_URL")]
    pub url: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, env = "FRIENDSGO_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "FRIENDSGO_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,

    /// Readiness probe timeout for the database check
    #[arg(long, env = "FRIENDSGO_DB_HEALTH_TIMEOUT_MS", default_value_t = 2000)]
    pub health_timeout_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT signing
    #[arg(long, env = "FRIENDSGO_JWT_SECRET")]
    pub jwt_secret: String,

    /// Access token time-to-live in seconds
    #[arg(long, env = "FRIENDSGO_ACCESS_TOKEN_TTL_SECS", default_value_t = 86_400)]
    pub access_token_ttl_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// Maximum length of a chat message in characters
    #[arg(long, env = "FRIENDSGO_MAX_CONTENT_LENGTH", default_value_t = 4096)]
    pub max_content_length: usize,

    /// Maximum number of pending messages pushed to a socket per fetch
    #[arg(long, env = "FRIENDSGO_BATCH_LIMIT", default_value_t = 50)]
    pub batch_limit: i64,

    /// Upper bound for a single history page
    #[arg(long, env = "FRIENDSGO_HISTORY_PAGE_LIMIT", default_value_t = 100)]
    pub history_page_limit: i64,
}

#[derive(Clone, Debug, Args)]
pub struct NotificationConfig {
    /// How often to reclaim user channels without subscribers
    #[arg(long, env = "FRIENDSGO_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,

    /// Capacity of each user's broadcast channel
    #[arg(long, env = "FRIENDSGO_USER_CHANNEL_CAPACITY", default_value_t = 64)]
    pub user_channel_capacity: usize,
}

#[derive(Clone, Debug, Args)]
pub struct WsConfig {
    /// Size of the outbound message buffer
    #[arg(long, env = "FRIENDSGO_WS_OUTBOUND_BUFFER_SIZE", default_value_t = 32)]
    pub outbound_buffer_size: usize,

    /// Interval between server heartbeat pings
    #[arg(long, env = "FRIENDSGO_WS_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    /// Grace period after a ping before an idle connection is closed
    #[arg(long, env = "FRIENDSGO_WS_PING_TIMEOUT_SECS", default_value_t = 10)]
    pub ping_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; traces and metrics are exported only when set
    #[arg(long, env = "FRIENDSGO_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "FRIENDSGO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
