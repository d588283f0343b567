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

pub mod error;
pub mod http;
pub mod metrics;
pub mod queue;

use std::net::SocketAddr;

use keyq_error::Result;
use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Handle for managing a running HTTP listener.
///
/// This handle provides control over a running listener, allowing you to:
/// - Wait for it to start accepting connections
/// - Signal graceful shutdown
/// - Wait for it to fully stop
/// - Check if the server task has completed
pub struct ServiceHandler {
    /// Join handle for the server task
    join_handle:        JoinHandle<()>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Receiver for server start notification
    started_rx:         Option<Receiver<()>>,
    /// Address the listener is bound to
    local_addr:         SocketAddr,
}

impl ServiceHandler {
    /// Waits for the server to start accepting connections.
    ///
    /// Returns immediately on later calls, or if the server task has already
    /// exited.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        if let Some(started_rx) = self.started_rx.take() {
            let _ = started_rx.await;
        }
        Ok(())
    }

    /// Waits for the server to completely stop.
    ///
    /// In-flight requests, including parked bounded-wait retrievals, are
    /// allowed to finish first. Use this after calling `shutdown()`.
    pub async fn wait_for_stop(self) -> Result<()> {
        // A panicked server task has already logged through the panic hook.
        let _ = self.join_handle.await;
        Ok(())
    }

    /// Signals the server to begin graceful shutdown.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    /// The bound address; differs from the configured one when port 0 was
    /// requested.
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}
