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

//! Connection state of the link session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state.
///
/// Exactly one state is current per session. Only the session controller changes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Doing nothing.
    #[default]
    Disconnected,
    /// Listening for incoming connections.
    Listening,
    /// Initiating an outgoing connection.
    Connecting,
    /// Connected to a remote device but not configured yet.
    ConnectedUnconfigured,
    /// Connected to a remote device and configured.
    ConnectedConfigured,
    /// Error while trying to connect.
    ErrorConnecting,
    /// Error while configuring an established connection.
    ErrorConfiguring,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Listening => "Listening",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::ConnectedUnconfigured => "Connected (configuring)",
            ConnectionState::ConnectedConfigured => "Connected",
            ConnectionState::ErrorConnecting => "Error connecting",
            ConnectionState::ErrorConfiguring => "Error configuring",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ConnectionState::ErrorConnecting | ConnectionState::ErrorConfiguring
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectedUnconfigured | ConnectionState::ConnectedConfigured
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
