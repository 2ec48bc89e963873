#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::panic,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    missing_debug_implementations,
    unreachable_pub
)]

use clap::Parser;
use friendsgo_server::AppBuilder;
use friendsgo_server::adapters::Storage;
use friendsgo_server::adapters::database::{DbPool, init_pool, run_migrations};
use friendsgo_server::api::{MgmtState, app_router, mgmt_router};
use friendsgo_server::config::Config;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("friendsgo_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn get_test_config() -> Config {
    Config::try_parse_from([
        "friendsgo-server",
        "--jwt-secret",
        "test_secret",
        "--host",
        "127.0.0.1",
        "--port",
        "0",
        "--mgmt-port",
        "0",
    ])
    .unwrap()
}

/// Connects to `DATABASE_URL` and migrates it. Returns `None` when no database is configured.
pub async fn get_test_pool() -> Option<DbPool> {
    setup_tracing();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let config = get_test_config();
    let pool = init_pool(&config.database, &database_url).await.expect("Failed to connect to DB. Is Postgres running?");
    run_migrations(&pool).await.expect("Failed to run migrations");

    Some(pool)
}

pub fn generate_username(prefix: &str) -> String {
    format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
}

pub struct TestUser {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub mgmt_url: String,
    pub client: reqwest::Client,
    pub config: Config,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(config.clone())
            .with_storage(Storage::in_memory())
            .with_shutdown_rx(shutdown_rx.clone())
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mgmt_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mgmt_addr = mgmt_listener.local_addr().unwrap();

        let router = app_router(app.services, shutdown_rx.clone());
        let mgmt = mgmt_router(MgmtState { health_service: app.health_service });

        let mut api_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = api_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });
        tokio::spawn(async move {
            axum::serve(mgmt_listener, mgmt.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/v1/gateway"),
            mgmt_url: format!("http://{mgmt_addr}"),
            client: reqwest::Client::new(),
            config,
            shutdown_tx,
        }
    }

    pub async fn register_user(&self, username: &str) -> TestUser {
        let resp = self
            .client
            .post(format!("{}/v1/users", self.server_url))
            .json(&json!({ "username": username, "password": "password123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "registration failed for {username}");

        let body: Value = resp.json().await.unwrap();
        TestUser {
            user_id: body["userId"].as_str().unwrap().parse().unwrap(),
            username: username.to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Opens a gateway connection without joining.
    pub async fn connect_ws(&self, token: &str) -> TestWsClient {
        let (stream, _) = connect_async(format!("{}?token={token}", self.ws_url)).await.unwrap();
        TestWsClient { stream }
    }

    /// Opens a gateway connection and completes `join-user`.
    pub async fn join(&self, user: &TestUser) -> TestWsClient {
        let mut client = self.connect_ws(&user.token).await;
        client.send_event("join-user", json!({ "userId": user.user_id, "token": user.token })).await;
        let joined = client.expect_event("user-joined").await;
        assert_eq!(joined["userId"], json!(user.user_id));
        client
    }
}

pub struct TestWsClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    pub async fn send_event(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data });
        self.stream.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    pub async fn receive_raw_timeout(&mut self, timeout: Duration) -> Option<Result<Message, String>> {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Ok(Some(msg)) => Some(msg.map_err(|e| e.to_string())),
            Ok(None) | Err(_) => None,
        }
    }

    /// Next JSON event, skipping control frames.
    pub async fn receive_event_timeout(&mut self, timeout: Duration) -> Option<(String, Value)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.receive_raw_timeout(remaining).await? {
                Ok(Message::Text(text)) => {
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    return Some((frame["event"].as_str().unwrap().to_string(), frame["data"].clone()));
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(other) => panic!("unexpected frame: {other:?}"),
                Err(e) => panic!("websocket error: {e}"),
            }
        }
    }

    /// Waits for the next event and asserts its name.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        let (event, data) = self
            .receive_event_timeout(Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {name}"));
        assert_eq!(event, name, "unexpected event with payload {data}");
        data
    }

    /// Asserts that no event arrives within `timeout`.
    pub async fn expect_silence(&mut self, timeout: Duration) {
        if let Some((event, data)) = self.receive_event_timeout(timeout).await {
            panic!("expected no event, got {event}: {data}");
        }
    }
}
