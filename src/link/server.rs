// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Listener accepting one inbound connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::session::Shared;
use crate::transport::ListenEndpoint;

/// Accept loop over one listening endpoint.
pub(crate) struct Listener {
    id: u64,
    endpoint: Box<dyn ListenEndpoint>,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl Listener {
    pub(crate) fn new(id: u64, endpoint: Box<dyn ListenEndpoint>) -> Self {
        Self {
            id,
            endpoint,
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The accept loop ended on its own; the next `start()` must open a new endpoint.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Accept loop.
    pub(crate) fn run(self: Arc<Self>, shared: Arc<Shared>) {
        info!("Waiting for connections...");

        while !shared.is_configured() {
            match self.endpoint.accept() {
                Ok(handle) => {
                    info!("Connection from: {}", handle.peer());
                    shared.accepted(self.id, handle);
                }
                Err(e) => {
                    if self.cancelled.load(Ordering::SeqCst) {
                        debug!("Listener {} cancelled", self.id);
                    } else {
                        error!("Accept error: {}", e);
                    }
                    break;
                }
            }
        }

        self.finished.store(true, Ordering::SeqCst);
        debug!("Listener {} stopped", self.id);
    }

    /// Close the endpoint, unblocking `accept`. Safe to call repeatedly from any thread.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.endpoint.close() {
            error!("close() of server socket failed: {}", e);
        }
    }
}
