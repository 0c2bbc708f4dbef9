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

//! Event sink and event dispatch.
//!
//! The session pushes every observable change through an [`EventSink`]. Sinks are called
//! synchronously on the worker thread that produced the event; a host UI must do its own
//! thread hop (for example through [`ChannelSink`]).

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::LinkError;
use crate::state::ConnectionState;

/// A failure as seen by the event sink.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Human-readable message.
    pub message: String,
    /// State reported with the failure.
    pub state: ConnectionState,
    /// Underlying fault.
    pub cause: Arc<LinkError>,
}

impl ErrorReport {
    pub fn new(cause: LinkError) -> Self {
        Self {
            message: cause.message().to_string(),
            state: cause.reported_state(),
            cause: Arc::new(cause),
        }
    }
}

/// Observer of a link session. Every method defaults to doing nothing.
pub trait EventSink: Send + Sync {
    /// The session moved to a new state.
    fn on_state_changed(&self, _state: ConnectionState) {}

    /// A complete frame arrived.
    fn on_message_received(&self, _message: &str) {}

    /// Bytes were written to the peer.
    fn on_message_sent(&self, _bytes: &[u8]) {}

    /// The connected peer's name became known.
    fn on_peer_identified(&self, _name: &str) {}

    /// Something failed.
    fn on_error(&self, _report: &ErrorReport) {}
}

/// Events emitted by a link session.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// Frame received from the board.
    MessageReceived(String),
    /// Bytes written to the board.
    MessageSent(Vec<u8>),
    /// Name of the connected device.
    PeerIdentified(String),
    /// Error occurred.
    Error(ErrorReport),
}

impl LinkEvent {
    /// Deliver this event to the matching sink method.
    pub fn dispatch(&self, sink: &dyn EventSink) {
        match self {
            LinkEvent::StateChanged(state) => sink.on_state_changed(*state),
            LinkEvent::MessageReceived(message) => sink.on_message_received(message),
            LinkEvent::MessageSent(bytes) => sink.on_message_sent(bytes),
            LinkEvent::PeerIdentified(name) => sink.on_peer_identified(name),
            LinkEvent::Error(report) => sink.on_error(report),
        }
    }
}

/// Forwards events into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LinkEvent) {
        // Receiver dropped: nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_state_changed(&self, state: ConnectionState) {
        self.send(LinkEvent::StateChanged(state));
    }

    fn on_message_received(&self, message: &str) {
        self.send(LinkEvent::MessageReceived(message.to_string()));
    }

    fn on_message_sent(&self, bytes: &[u8]) {
        self.send(LinkEvent::MessageSent(bytes.to_vec()));
    }

    fn on_peer_identified(&self, name: &str) {
        self.send(LinkEvent::PeerIdentified(name.to_string()));
    }

    fn on_error(&self, report: &ErrorReport) {
        self.send(LinkEvent::Error(report.clone()));
    }
}

/// Logs every event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_state_changed(&self, state: ConnectionState) {
        info!("Link state: {}", state);
    }

    fn on_message_received(&self, message: &str) {
        info!("Message received: {}", message);
    }

    fn on_message_sent(&self, bytes: &[u8]) {
        info!("Message sent: {}", String::from_utf8_lossy(bytes));
    }

    fn on_peer_identified(&self, name: &str) {
        info!("Connected to: {}", name);
    }

    fn on_error(&self, report: &ErrorReport) {
        error!("{} ({}): {}", report.message, report.state, report.cause);
    }
}
