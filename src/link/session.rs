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

//! Session controller: the connection state machine.
//!
//! All bookkeeping (which listener, connector and connection are current, and the state)
//! lives in one [`Core`] behind a single mutex. The mutex is never held across a blocking
//! transport call and never while the event sink runs: transitions queue their events in
//! an outbox, and the outbox is drained in order after the lock is released.
//!
//! Workers are plain threads. Each one carries an id; a completion from a worker that is
//! no longer current only cleans up after itself and never touches the live session.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::connector::Connector;
use super::framing::encode_frame;
use super::server::Listener;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::{ErrorReport, EventSink, LinkEvent};
use crate::state::ConnectionState;
use crate::transport::{PeerIdentity, Transport, TransportHandle};

struct Core {
    state: ConnectionState,
    listener: Option<Arc<Listener>>,
    connector: Option<Arc<Connector>>,
    connection: Option<Arc<Connection>>,
    /// Opening the endpoint failed; no listening until `stop()`.
    listen_failed: bool,
    outbox: VecDeque<LinkEvent>,
}

impl Core {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("State {} -> {}", self.state, state);
        self.state = state;
        self.outbox.push_back(LinkEvent::StateChanged(state));
    }

    fn report(&mut self, error: LinkError) {
        error!("{}: {}", error.message(), error);
        self.outbox
            .push_back(LinkEvent::Error(ErrorReport::new(error)));
    }

    fn cancel_connector(&mut self) {
        if let Some(connector) = self.connector.take() {
            connector.cancel();
        }
    }

    fn cancel_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
    }

    fn cancel_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cancel();
        }
    }
}

fn spawn_worker(worker: &'static str, f: impl FnOnce() + Send + 'static) -> Result<()> {
    thread::Builder::new()
        .name(format!("inolink-{}", worker))
        .spawn(f)
        .map(|_| ())
        .map_err(|source| LinkError::Spawn { worker, source })
}

/// Copy of `e` for a second owner, keeping the OS error code when there is one.
fn copy_io_error(e: &io::Error) -> io::Error {
    match e.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(e.kind(), e.to_string()),
    }
}

/// State shared between the session handle and its worker threads.
pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    config: LinkConfig,
    duplex: AtomicBool,
    next_id: AtomicU64,
    core: Mutex<Core>,
    delivery: ReentrantMutex<()>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drain the outbox into the sink, in order.
    ///
    /// Must be called without holding the core lock. Reentrant so a sink callback may call
    /// back into the session.
    fn deliver(&self) {
        let _delivery = self.delivery.lock();
        loop {
            let event = self.core.lock().outbox.pop_front();
            match event {
                Some(event) => event.dispatch(self.sink.as_ref()),
                None => break,
            }
        }
    }

    fn start_locked(self: &Arc<Self>, core: &mut Core) {
        core.cancel_connector();
        core.cancel_connection();
        core.set_state(ConnectionState::Listening);

        let running = core
            .listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished());
        if !running && !core.listen_failed {
            self.spawn_listener(core);
        }
    }

    fn spawn_listener(self: &Arc<Self>, core: &mut Core) {
        let id = self.next_id();
        let service = self.config.service_id();

        let endpoint = match self.transport.listen(&service) {
            Ok(endpoint) => endpoint,
            Err(source) => {
                core.listen_failed = true;
                core.listener = None;
                core.report(LinkError::Listen {
                    service: service.name,
                    source,
                });
                return;
            }
        };

        info!(
            "Listening for {} on {} transport",
            service,
            self.transport.name()
        );
        let listener = Arc::new(Listener::new(id, endpoint));
        let worker = listener.clone();
        let shared = self.clone();
        match spawn_worker("accept", move || worker.run(shared)) {
            Ok(()) => core.listener = Some(listener),
            Err(e) => {
                listener.cancel();
                core.listener = None;
                core.report(e);
            }
        }
    }

    /// Promote `handle` to the active connection.
    fn connected_locked(self: &Arc<Self>, core: &mut Core, handle: Arc<dyn TransportHandle>) {
        // Only one peer is ever wanted.
        core.cancel_connector();
        core.cancel_connection();
        core.cancel_listener();

        let duplex = self.duplex.load(Ordering::SeqCst);
        let connection = Arc::new(Connection::new(self.next_id(), handle, duplex));
        info!(
            "Connected to {} ({})",
            connection.peer(),
            if connection.is_duplex() { "duplex" } else { "simplex" }
        );

        if connection.is_duplex() {
            let reader = connection.clone();
            let shared = self.clone();
            let chunk_size = self.config.read_chunk_size;
            if let Err(e) = spawn_worker("reader", move || reader.read_loop(shared, chunk_size)) {
                core.report(e);
            }
        }

        core.connection = Some(connection.clone());
        core.outbox.push_back(LinkEvent::PeerIdentified(
            connection.peer().display_name().to_string(),
        ));
        core.set_state(ConnectionState::ConnectedConfigured);
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.core.lock().state == ConnectionState::ConnectedConfigured
    }

    /// Whether the reader of connection `id` should keep reading.
    pub(crate) fn is_reading(&self, id: u64) -> bool {
        let core = self.core.lock();
        core.state == ConnectionState::ConnectedConfigured
            && core.connection.as_ref().is_some_and(|c| c.id() == id)
    }

    /// A listener produced a handle.
    pub(crate) fn accepted(self: &Arc<Self>, listener_id: u64, handle: Arc<dyn TransportHandle>) {
        {
            let mut core = self.core.lock();
            let current = core
                .listener
                .as_ref()
                .is_some_and(|l| l.id() == listener_id);

            match core.state {
                ConnectionState::Listening | ConnectionState::Connecting if current => {
                    self.connected_locked(&mut core, handle);
                }
                state => {
                    // Either not ready or already connected.
                    info!("Rejecting connection from {} while {}", handle.peer(), state);
                    if let Err(e) = handle.close() {
                        error!("Could not close unwanted socket: {}", e);
                    }
                }
            }
        }
        self.deliver();
    }

    /// A connector finished its single attempt.
    pub(crate) fn connector_finished(
        self: &Arc<Self>,
        connector_id: u64,
        result: std::result::Result<Arc<dyn TransportHandle>, LinkError>,
    ) {
        {
            let mut core = self.core.lock();
            let current = core
                .connector
                .as_ref()
                .is_some_and(|c| c.id() == connector_id);

            match result {
                Ok(handle) if current => {
                    core.connector = None;
                    self.connected_locked(&mut core, handle);
                }
                Ok(handle) => {
                    debug!("Dropping connection of superseded connector {}", connector_id);
                    if let Err(e) = handle.close() {
                        error!("Could not close unwanted socket: {}", e);
                    }
                }
                Err(e) if current => {
                    core.connector = None;
                    core.report(e);
                    // Start over in listening mode.
                    self.start_locked(&mut core);
                }
                Err(e) => {
                    debug!("Superseded connector {} failed: {}", connector_id, e);
                }
            }
        }
        self.deliver();
    }

    pub(crate) fn frames_received(&self, connection_id: u64, frames: Vec<String>) {
        {
            let mut core = self.core.lock();
            if !core
                .connection
                .as_ref()
                .is_some_and(|c| c.id() == connection_id)
            {
                return;
            }
            for frame in frames {
                debug!("Frame received: {}", frame);
                core.outbox.push_back(LinkEvent::MessageReceived(frame));
            }
        }
        self.deliver();
    }

    /// The reader of connection `id` hit end of stream or a read error.
    pub(crate) fn connection_lost(self: &Arc<Self>, connection_id: u64, source: io::Error) {
        {
            let mut core = self.core.lock();
            let connection = match core.connection.as_ref() {
                Some(c) if c.id() == connection_id => c.clone(),
                _ => {
                    debug!("Reader of closed connection {} stopped: {}", connection_id, source);
                    return;
                }
            };

            core.cancel_connection();
            core.report(LinkError::ConnectionLost {
                peer: connection.peer().to_string(),
                source,
            });
            core.set_state(ConnectionState::Disconnected);
            // Start over in listening mode.
            self.start_locked(&mut core);
        }
        self.deliver();
    }
}

/// A single-peer link session.
///
/// Dropping the session stops it.
pub struct LinkSession {
    shared: Arc<Shared>,
}

impl LinkSession {
    /// Create a session in the `Disconnected` state. Call [`LinkSession::start`] to listen.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        config: LinkConfig,
    ) -> Self {
        let duplex = config.duplex;
        Self {
            shared: Arc::new(Shared {
                transport,
                sink,
                config,
                duplex: AtomicBool::new(duplex),
                next_id: AtomicU64::new(1),
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    listener: None,
                    connector: None,
                    connection: None,
                    listen_failed: false,
                    outbox: VecDeque::new(),
                }),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Return the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::ConnectedConfigured
    }

    /// Identity of the connected peer.
    pub fn peer(&self) -> Option<PeerIdentity> {
        self.shared
            .core
            .lock()
            .connection
            .as_ref()
            .map(|c| c.peer().clone())
    }

    /// Read frames on the next connection (`true`) or only write to it (`false`).
    ///
    /// An active connection keeps the mode it was established with.
    pub fn set_duplex(&self, duplex: bool) {
        self.shared.duplex.store(duplex, Ordering::SeqCst);
        info!(
            "Set connection to {}",
            if duplex { "duplex" } else { "simplex" }
        );
    }

    pub fn is_duplex(&self) -> bool {
        self.shared.duplex.load(Ordering::SeqCst)
    }

    /// Listen for incoming connections, dropping any outgoing attempt or active connection.
    pub fn start(&self) {
        {
            let mut core = self.shared.core.lock();
            self.shared.start_locked(&mut core);
        }
        self.shared.deliver();
    }

    /// Start connecting to `peer_address`. The listener keeps running meanwhile.
    pub fn connect(&self, peer_address: &str) {
        let shared = &self.shared;
        {
            let mut core = shared.core.lock();
            if core.state == ConnectionState::Connecting {
                core.cancel_connector();
            }
            core.cancel_connection();

            let connector = Arc::new(Connector::new(
                shared.next_id(),
                shared.transport.as_ref(),
                peer_address,
            ));
            let worker = connector.clone();
            let worker_shared = shared.clone();
            let transport = shared.transport.clone();
            match spawn_worker("connect", move || worker.run(worker_shared, transport)) {
                Ok(()) => {
                    core.connector = Some(connector);
                    core.set_state(ConnectionState::Connecting);
                }
                Err(e) => {
                    connector.cancel();
                    core.report(e);
                    shared.start_locked(&mut core);
                }
            }
        }
        shared.deliver();
    }

    /// Stop all workers and close every handle.
    pub fn stop(&self) {
        {
            let mut core = self.shared.core.lock();
            core.cancel_connector();
            core.cancel_connection();
            core.cancel_listener();
            core.listen_failed = false;
            core.set_state(ConnectionState::Disconnected);
        }
        self.shared.deliver();
    }

    /// Write raw bytes to the connected peer.
    ///
    /// Blocks for the duration of the transport write, without holding the session lock.
    /// A failed write is reported but does not tear the connection down; the reader
    /// notices the broken stream.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let connection = {
            let core = self.shared.core.lock();
            if core.state != ConnectionState::ConnectedConfigured {
                return Err(LinkError::NotConnected);
            }
            core.connection.clone().ok_or(LinkError::NotConnected)?
        };

        let result = match connection.write(bytes) {
            Ok(()) => {
                self.shared
                    .core
                    .lock()
                    .outbox
                    .push_back(LinkEvent::MessageSent(bytes.to_vec()));
                Ok(())
            }
            Err(source) => {
                // The sink gets the original error, the caller a copy.
                let returned = LinkError::Write {
                    peer: connection.peer().to_string(),
                    source: copy_io_error(&source),
                };
                self.shared.core.lock().report(LinkError::Write {
                    peer: connection.peer().to_string(),
                    source,
                });
                Err(returned)
            }
        };
        self.shared.deliver();
        result
    }

    /// Send text as-is. Blank text is skipped.
    pub fn send_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            warn!("Skipping blank message");
            return Ok(());
        }
        self.write(text.as_bytes())
    }

    /// Send `payload` wrapped in frame delimiters.
    pub fn send_frame(&self, payload: &str) -> Result<()> {
        let frame = encode_frame(payload)?;
        self.write(&frame)
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.stop();
    }
}
