// Copyright 2026 beacon authors
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

pub mod grpc;

use futures::future::join_all;
use snafu::Snafu;
use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddress {
        addr: String,
        #[snafu(source)]
        source: std::net::AddrParseError,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to bind {addr}"))]
    Bind {
        addr: String,
        #[snafu(source)]
        source: std::io::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle for managing a running server task.
///
/// Supports waiting for the listener to come up, signalling graceful
/// shutdown, and waiting for the task to finish. Shutdown is driven by a
/// cancellation token, so calling it more than once is harmless.
pub struct ServiceHandler {
    /// Join handle for the server task
    join_handle: JoinHandle<()>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Receiver for server start notification
    started_rx: Option<Receiver<()>>,
    /// Join handles for readiness reporting tasks
    reporter_handles: Vec<JoinHandle<()>>,
}

impl ServiceHandler {
    /// Assemble a handle for a server task spawned elsewhere in the
    /// workspace (the HTTP gateway uses this).
    pub fn new(
        join_handle: JoinHandle<()>,
        cancellation_token: CancellationToken,
        started_rx: Receiver<()>,
        reporter_handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            join_handle,
            cancellation_token,
            started_rx: Some(started_rx),
            reporter_handles,
        }
    }

    /// Waits for the server to start accepting connections.
    ///
    /// # Panics
    /// Panics if called more than once, as the start signal is consumed.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        self.started_rx
            .take()
            .expect("Server start signal already consumed")
            .await
            .expect("Failed to receive server start signal");
        Ok(())
    }

    /// Waits for the server task (and its reporter tasks) to finish. Use
    /// after [`shutdown`](Self::shutdown) for a clean stop.
    pub async fn wait_for_stop(self) -> Result<()> {
        let handles = self
            .reporter_handles
            .into_iter()
            .chain(std::iter::once(self.join_handle));
        join_all(handles).await;
        Ok(())
    }

    /// Signals the server to begin graceful shutdown without waiting.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Whether the server task has completed.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}
