#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;

use crate::adapters::Storage;
use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::account_service::AccountService;
use crate::services::auth_service::AuthService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::notification_service::{LocalNotificationService, NotificationService};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the servers need once wiring is done.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
}

/// Wires services on top of a chosen storage backend.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    storage: Option<Storage>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, storage: None, shutdown_rx: None }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_shutdown_rx(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Builds the application services.
    ///
    /// Falls back to in-memory storage when none was supplied.
    ///
    /// # Errors
    /// Returns an error if no shutdown receiver was supplied.
    pub fn build(self) -> anyhow::Result<App> {
        let shutdown_rx = self.shutdown_rx.ok_or_else(|| anyhow::anyhow!("Shutdown receiver is required"))?;
        let storage = self.storage.unwrap_or_else(Storage::in_memory);
        let config = self.config;

        let notifier: Arc<dyn NotificationService> =
            Arc::new(LocalNotificationService::new(&config.notifications, shutdown_rx));

        let auth_service = AuthService::new(config.auth.clone());
        let account_service = AccountService::new(Arc::clone(&storage.users), auth_service.clone());
        let message_service = MessageService::new(
            Arc::clone(&storage.messages),
            Arc::clone(&storage.users),
            Arc::clone(&notifier),
            config.messaging.clone(),
        );
        let gateway_service =
            GatewayService::new(message_service.clone(), auth_service.clone(), notifier, config.websocket.clone());

        let health_service = HealthService::new(storage.pool, config.database.health_timeout_ms);

        Ok(App {
            services: ServiceContainer { account_service, auth_service, message_service, gateway_service },
            health_service,
        })
    }
}

/// Flips the shutdown channel on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the configured log sink.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = panic_info.location().map(ToString::to_string).unwrap_or_default();

        tracing::error!(panic.message = %message, panic.location = %location, "Process panicked");
    }));
}
