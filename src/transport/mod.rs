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

//! Transport contract used by the link session.
//!
//! A transport hands out blocking byte-stream handles. Closing a handle (or a listening
//! endpoint) is the only way to interrupt a blocking call on it, so every implementation
//! must make `close` unblock a concurrent `accept`, `connect` or `read` with an error.

pub mod memory;

#[cfg(feature = "bluez")]
pub mod bluez;

use std::fmt;
use std::io;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of the remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub name: Option<String>,
    pub address: String,
}

impl PeerIdentity {
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }

    /// Name if known, address otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Well-known service a listener registers under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceId {
    pub name: String,
    pub uuid: Uuid,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// One bidirectional byte stream.
pub trait TransportHandle: Send + Sync {
    /// Establish an outbound connection. Blocks until connected, refused or closed.
    ///
    /// Handles produced by a listening endpoint are already connected.
    fn connect(&self) -> io::Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Close the stream, aborting any blocking call. Safe to call more than once.
    fn close(&self) -> io::Result<()>;

    /// Remote device of this stream.
    fn peer(&self) -> PeerIdentity;
}

/// Server-mode endpoint producing inbound handles.
pub trait ListenEndpoint: Send + Sync {
    /// Block until a peer connects or the endpoint is closed.
    fn accept(&self) -> io::Result<Arc<dyn TransportHandle>>;

    /// Close the endpoint, failing a concurrent `accept`. Safe to call more than once.
    fn close(&self) -> io::Result<()>;
}

/// Factory for endpoints and outbound handles.
pub trait Transport: Send + Sync {
    /// Open a listening endpoint for `service`.
    fn listen(&self, service: &ServiceId) -> io::Result<Box<dyn ListenEndpoint>>;

    /// Create an unconnected handle targeting `peer_address`.
    fn socket(&self, peer_address: &str) -> io::Result<Arc<dyn TransportHandle>>;

    /// Stop any running device discovery; it slows down connection attempts.
    fn cancel_discovery(&self) {}

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
