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

//! Error types for the link session.

use std::io;
use thiserror::Error;

use crate::link::FrameError;
use crate::state::ConnectionState;

/// Result type alias using [`LinkError`].
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failures of the link session.
///
/// Every failure except [`LinkError::NotConnected`] is also pushed to the event sink,
/// together with [`LinkError::message`] and [`LinkError::reported_state`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The listening endpoint could not be opened. Listening stays off until `stop()`.
    #[error("listen on service '{service}' failed: {source}")]
    Listen {
        service: String,
        #[source]
        source: io::Error,
    },

    /// The outbound connection attempt failed.
    #[error("connect to {peer} failed: {source}")]
    Connect {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// The active connection failed while reading.
    #[error("connection to {peer} lost: {source}")]
    ConnectionLost {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// A write on the active connection failed.
    #[error("write to {peer} failed: {source}")]
    Write {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be spawned.
    #[error("could not spawn {worker} thread: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: io::Error,
    },

    /// There is no configured connection to write to.
    #[error("not connected")]
    NotConnected,

    /// Payload cannot be framed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl LinkError {
    /// Human-readable message shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            LinkError::Listen { .. } => "Unable to listen for Bluetooth connections",
            LinkError::Connect { .. } => "Error connecting to the Bluetooth device",
            LinkError::ConnectionLost { .. } => "The connection with the Bluetooth device was lost",
            LinkError::Write { .. } => "Error sending the message to the Bluetooth device",
            LinkError::Spawn { .. } => "Unable to start the Bluetooth worker",
            LinkError::NotConnected => "Not connected to a Bluetooth device",
            LinkError::Frame(_) => "Invalid message",
        }
    }

    /// State reported with this failure.
    pub fn reported_state(&self) -> ConnectionState {
        match self {
            LinkError::Write { .. } | LinkError::Frame(_) => ConnectionState::ErrorConfiguring,
            _ => ConnectionState::ErrorConnecting,
        }
    }

    /// Underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            LinkError::Listen { source, .. }
            | LinkError::Connect { source, .. }
            | LinkError::ConnectionLost { source, .. }
            | LinkError::Write { source, .. }
            | LinkError::Spawn { source, .. } => Some(source),
            LinkError::NotConnected | LinkError::Frame(_) => None,
        }
    }
}
