// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bon::Builder;
use futures::future::join_all;
use keyq_common_telemetry::{
    WorkerGuard,
    logging::{LoggingOptions, init_global_logging},
    panic_hook::set_panic_hook,
};
use keyq_server::{
    ServiceHandler,
    http::{RestServerConfig, start_rest_server},
    metrics::metrics_routes,
    queue::{SharedStore, queue_service},
};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    /// Application configuration
    pub config:         AppConfig,
    /// Controls if the application should continue running
    #[default(_code = "Arc::new(AtomicBool::new(false))")]
    running:            Arc<AtomicBool>,
    /// Cancellation token for graceful shutdown
    #[default(_code = "CancellationToken::new()")]
    cancellation_token: CancellationToken,
    /// The one queue store, shared by every request for the process lifetime
    store:              SharedStore,
}

/// Configuration for the application
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct AppConfig {
    /// Queue listener configuration
    #[builder(default)]
    pub http_config:              RestServerConfig,
    /// Admin listener serving `/metrics`; disabled when `None`
    pub metrics_config:           Option<RestServerConfig>,
    /// Logging configuration
    #[builder(default)]
    pub logging:                  LoggingOptions,
    /// Whether Ctrl+C and SIGTERM trigger a graceful shutdown
    #[default = true]
    #[builder(default = true)]
    pub enable_graceful_shutdown: bool,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config: self,
            ..Default::default()
        }
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    /// Application running flag
    running:            Arc<AtomicBool>,
    /// Cancellation token
    cancellation_token: CancellationToken,
    /// Task that stops the listeners once shutdown is requested
    supervisor:         Option<JoinHandle<()>>,
    local_addr:         SocketAddr,
    metrics_addr:       Option<SocketAddr>,
    /// Flushes buffered log lines when dropped
    _log_guards:        Vec<WorkerGuard>,
}

impl AppHandle {
    /// Gracefully shutdown the application
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.cancellation_token.cancel();
    }

    /// Check if the application is still running
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Wait until every listener has stopped
    pub async fn wait_for_shutdown(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }

    /// Address of the queue listener
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Address of the metrics listener, if one was configured
    #[must_use]
    pub const fn metrics_addr(&self) -> Option<SocketAddr> { self.metrics_addr }
}

impl App {
    /// The store served by this application
    #[must_use]
    pub const fn store(&self) -> &SharedStore { &self.store }

    /// Start the application and return a handle for controlling it
    pub async fn start(&self) -> Result<AppHandle, Whatever> {
        let log_guards = init_global_logging("keyq", &self.config.logging);
        set_panic_hook();

        info!("Starting keyq application");

        let mut queue = start_rest_server(
            self.config.http_config.clone(),
            vec![queue_service(
                Arc::clone(&self.store),
                self.cancellation_token.clone(),
            )],
        )
        .await
        .whatever_context("Failed to start queue listener")?;
        queue.wait_for_start().await.whatever_context("Queue listener did not start")?;
        let local_addr = queue.local_addr();

        let mut handles = vec![queue];
        let mut metrics_addr = None;
        if let Some(metrics_config) = &self.config.metrics_config {
            match start_rest_server(metrics_config.clone(), vec![metrics_routes]).await {
                Ok(mut metrics) => {
                    metrics.wait_for_start().await.whatever_context("Metrics listener did not start")?;
                    metrics_addr = Some(metrics.local_addr());
                    handles.push(metrics);
                }
                Err(e) => {
                    stop_all(handles).await;
                    return Err(e).whatever_context("Failed to start metrics listener");
                }
            }
        }

        self.running.store(true, Ordering::SeqCst);
        info!(queue = %local_addr, metrics = ?metrics_addr, "Application started successfully");

        let supervisor = tokio::spawn(supervise(
            handles,
            Arc::clone(&self.running),
            self.cancellation_token.clone(),
            self.config.enable_graceful_shutdown,
        ));

        Ok(AppHandle {
            running: Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
            supervisor: Some(supervisor),
            local_addr,
            metrics_addr,
            _log_guards: log_guards,
        })
    }

    /// Run the application blocking until it's shut down
    pub async fn run(self) -> Result<(), Whatever> {
        let mut handle = self.start().await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

async fn supervise(
    handles: Vec<ServiceHandler>,
    running: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    enable_graceful_shutdown: bool,
) {
    if enable_graceful_shutdown {
        shutdown_signal(&cancellation_token).await;
    } else {
        // Just wait for explicit shutdown if graceful shutdown is disabled
        cancellation_token.cancelled().await;
    }
    cancellation_token.cancel();

    info!("Shutting down servers");
    stop_all(handles).await;
    running.store(false, Ordering::SeqCst);
    info!("Application shutdown complete");
}

async fn stop_all(handles: Vec<ServiceHandler>) {
    for handle in &handles {
        handle.shutdown();
    }
    for result in join_all(handles.into_iter().map(ServiceHandler::wait_for_stop)).await {
        if let Err(e) = result {
            warn!("Listener did not stop cleanly: {e}");
        }
    }
}

async fn shutdown_signal(cancellation_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
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
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        () = cancellation_token.cancelled() => { info!("Received shutdown signal"); },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ephemeral() -> RestServerConfig {
        RestServerConfig::builder()
            .bind_address("127.0.0.1:0")
            .build()
    }

    fn test_config() -> AppConfig {
        AppConfig::builder()
            .http_config(ephemeral())
            .enable_graceful_shutdown(false)
            .build()
    }

    #[tokio::test]
    async fn test_app_creation() {
        let app = AppConfig::default().open();
        assert!(!app.running.load(Ordering::SeqCst));
        assert!(app.config.enable_graceful_shutdown);
        assert!(app.config.metrics_config.is_none());
    }

    #[tokio::test]
    async fn test_app_serves_queue_until_shutdown() {
        let app = test_config().open();
        let mut handle = app.start().await.unwrap();
        assert!(handle.is_running());

        let base = format!("http://{}", handle.local_addr());
        let client = reqwest::Client::new();
        let put = client.put(format!("{base}/a?v=x")).send().await.unwrap();
        assert_eq!(put.status(), 200);
        assert_eq!(app.store().backlog_len("a"), 1);

        let got = client.get(format!("{base}/a")).send().await.unwrap();
        assert_eq!(got.text().await.unwrap(), "x");

        handle.shutdown();
        handle.wait_for_shutdown().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_releases_parked_clients() {
        let app = test_config().open();
        let mut handle = app.start().await.unwrap();

        let url = format!("http://{}/k?timeout=3600", handle.local_addr());
        let waiter = tokio::spawn(async move { reqwest::get(url).await.unwrap().status() });
        while app.store().waiting("k") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown();
        let stopped =
            tokio::time::timeout(Duration::from_secs(5), handle.wait_for_shutdown()).await;

        assert!(stopped.is_ok());
        assert!(!handle.is_running());
        assert_eq!(waiter.await.unwrap(), 404);
        assert_eq!(app.store().waiting("k"), 0);
    }

    #[tokio::test]
    async fn test_metrics_listener_is_separate() {
        let config = AppConfig {
            metrics_config: Some(ephemeral()),
            ..test_config()
        };
        let app = config.open();
        let mut handle = app.start().await.unwrap();
        let metrics_addr = handle.metrics_addr().unwrap();
        assert_ne!(metrics_addr, handle.local_addr());

        let response = reqwest::get(format!("http://{metrics_addr}/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        handle.shutdown();
        handle.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_unusable_address_fails_startup() {
        let config = AppConfig {
            http_config: RestServerConfig::builder()
                .bind_address("not an address")
                .build(),
            ..test_config()
        };
        assert!(config.open().start().await.is_err());
    }
}
