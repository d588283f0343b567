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

use std::net::SocketAddr;

use axum::{Router, extract::DefaultBodyLimit};
use keyq_error::{ConnectionSnafu, ParseAddressSnafu, Result};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::ServiceHandler;

/// Default bind address of a REST listener.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3000";

/// Default maximum HTTP request body size (1 MiB). Values travel in the
/// query string, so bodies are never read.
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 1024 * 1024;

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RestServerConfig {
    /// The address to bind the REST server
    #[default(_code = "DEFAULT_BIND_ADDRESS.to_string()")]
    #[builder(default = DEFAULT_BIND_ADDRESS.to_string(), into)]
    pub bind_address:  String,
    /// Maximum HTTP request body size in bytes
    #[default(_code = "DEFAULT_MAX_HTTP_BODY_SIZE")]
    #[builder(default = DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size: usize,
    /// Whether to enable CORS
    #[default = true]
    #[builder(default = true)]
    pub enable_cors:   bool,
}

/// Starts the REST server and returns a handle for managing its lifecycle.
///
/// Every route handler is applied to an empty router in order, then request
/// tracing, the body limit and (optionally) CORS are layered over all of them.
/// The listener is bound before this returns, so an unusable address is
/// reported here rather than from the background task.
///
/// # Errors
/// Returns an error if the bind address cannot be parsed or bound.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use keyq_server::http::{RestServerConfig, start_rest_server};
///
/// fn ping_routes(router: Router) -> Router {
///     router.route("/ping", get(|| async { "pong" }))
/// }
///
/// # async fn run() -> keyq_error::Result<()> {
/// let handle = start_rest_server(RestServerConfig::default(), vec![ping_routes]).await?;
/// handle.shutdown();
/// handle.wait_for_stop().await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_rest_server<F>(
    config: RestServerConfig,
    route_handlers: Vec<F>,
) -> Result<ServiceHandler>
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    let bind_addr = config
        .bind_address
        .parse::<SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;

    let mut router = Router::new();
    for handler in &route_handlers {
        router = handler(router);
    }
    info!("Registered {} REST route handler(s)", route_handlers.len());

    router = router
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(ConnectionSnafu {
            addr: config.bind_address.clone(),
        })?;
    let local_addr = listener.local_addr().context(ConnectionSnafu {
        addr: config.bind_address,
    })?;

    let cancellation_token = CancellationToken::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let shutdown = cancellation_token.clone();
    let join_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                info!("REST server (on {}) started", local_addr);
                let _ = started_tx.send(());
                shutdown.cancelled().await;
                info!("REST server (on {}) received shutdown signal", local_addr);
            })
            .await;

        info!(
            "REST server (on {}) task completed: {:?}",
            local_addr, result
        );
    });

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        started_rx: Some(started_rx),
        local_addr,
    })
}
