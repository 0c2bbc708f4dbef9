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

//! Single outbound connection attempt.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::session::Shared;
use crate::error::LinkError;
use crate::transport::{Transport, TransportHandle};

/// One blocking connect to a known peer. Never retries on its own.
pub(crate) struct Connector {
    id: u64,
    peer_address: String,
    handle: Option<Arc<dyn TransportHandle>>,
    create_error: Mutex<Option<io::Error>>,
}

impl Connector {
    /// Resolve the socket for `peer_address`. A failure here surfaces when the connector runs.
    pub(crate) fn new(id: u64, transport: &dyn Transport, peer_address: &str) -> Self {
        let (handle, create_error) = match transport.socket(peer_address) {
            Ok(handle) => (Some(handle), None),
            Err(e) => {
                error!("Socket create() for {} failed: {}", peer_address, e);
                (None, Some(e))
            }
        };

        Self {
            id,
            peer_address: peer_address.to_string(),
            handle,
            create_error: Mutex::new(create_error),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn run(self: Arc<Self>, shared: Arc<Shared>, transport: Arc<dyn Transport>) {
        info!("Connecting to {}", self.peer_address);

        // Discovery slows down the connection.
        transport.cancel_discovery();

        let Some(handle) = self.handle.clone() else {
            let source = self.create_error.lock().take().unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no socket for peer")
            });
            shared.connector_finished(
                self.id,
                Err(LinkError::Connect {
                    peer: self.peer_address.clone(),
                    source,
                }),
            );
            return;
        };

        match handle.connect() {
            Ok(()) => {
                debug!("Connected to {}", self.peer_address);
                shared.connector_finished(self.id, Ok(handle));
            }
            Err(e) => {
                error!("Error connecting to {}: {}", self.peer_address, e);
                if let Err(close_err) = handle.close() {
                    error!("unable to close() socket during connection failure: {}", close_err);
                }
                shared.connector_finished(
                    self.id,
                    Err(LinkError::Connect {
                        peer: self.peer_address.clone(),
                        source: e,
                    }),
                );
            }
        }
    }

    /// Close the socket being connected, aborting the blocking connect.
    pub(crate) fn cancel(&self) {
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.close() {
                error!("close() of connect socket failed: {}", e);
            }
        }
    }
}
