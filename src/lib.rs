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

//! Single-peer Bluetooth serial link to a microcontroller board.
//!
//! A [`LinkSession`] listens for the board, or connects to it on request, and exchanges
//! `&&payload%%` frames with it. Everything observable goes through an [`EventSink`].

pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod state;
pub mod transport;

pub use config::{Config, LinkConfig};
pub use error::{LinkError, Result};
pub use events::{ChannelSink, ErrorReport, EventSink, LinkEvent, TracingSink};
pub use link::{encode_frame, LinkSession};
pub use state::ConnectionState;
pub use transport::{ListenEndpoint, PeerIdentity, ServiceId, Transport, TransportHandle};
