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

//! In-process loopback transport.
//!
//! Every local handle is paired with a [`MemoryPeer`] that plays the board: it feeds bytes
//! to the local reader, collects what the local side wrote, and can break the link. The
//! transport also keeps counters (live handles, open endpoints, read calls) so callers can
//! check that the session never leaks a socket.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::{ListenEndpoint, PeerIdentity, ServiceId, Transport, TransportHandle};

/// OS error code of a failed local write (Linux `EPIPE`).
pub const EPIPE: i32 = 32;

/// How a known peer answers an outbound connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Connect immediately.
    Accept,
    /// Fail with `ConnectionRefused`.
    Refuse,
    /// Block until [`MemoryPeer::release`], [`MemoryPeer::refuse`] or the handle is closed.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Pending,
    Open,
    Refused,
}

struct LinkState {
    gate: Gate,
    to_local: VecDeque<u8>,
    to_peer: Vec<u8>,
    local_closed: bool,
    failure: Option<io::ErrorKind>,
    hung_up: bool,
    fail_writes: bool,
    read_calls: usize,
}

/// One connection shared between the local handle and its [`MemoryPeer`].
///
/// The hub keeps pending and outbound links, so links only hold it weakly.
struct Link {
    peer: PeerIdentity,
    state: Mutex<LinkState>,
    cond: Condvar,
    hub: Weak<Hub>,
}

impl Link {
    fn new(hub: &Arc<Hub>, peer: PeerIdentity, gate: Gate) -> Arc<Self> {
        Arc::new(Self {
            peer,
            state: Mutex::new(LinkState {
                gate,
                to_local: VecDeque::new(),
                to_peer: Vec::new(),
                local_closed: false,
                failure: None,
                hung_up: false,
                fail_writes: false,
                read_calls: 0,
            }),
            cond: Condvar::new(),
            hub: Arc::downgrade(hub),
        })
    }

    fn update(&self, f: impl FnOnce(&mut LinkState)) {
        let mut state = self.state.lock();
        f(&mut *state);
        self.cond.notify_all();
    }
}

struct HubState {
    fail_listen: bool,
    listen_calls: usize,
    next_endpoint: u64,
    open_endpoints: HashSet<u64>,
    pending_inbound: VecDeque<Arc<Link>>,
    peers: HashMap<String, (Option<String>, ConnectBehavior)>,
    outbound: HashMap<String, Arc<Link>>,
}

struct Hub {
    state: Mutex<HubState>,
    cond: Condvar,
    live_handles: AtomicUsize,
    max_live_handles: AtomicUsize,
    discovery_cancels: AtomicUsize,
}

impl Hub {
    fn track_open(&self) {
        let live = self.live_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_handles.fetch_max(live, Ordering::SeqCst);
    }

    fn track_close(&self) {
        self.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loopback transport. Cloning shares the same hub.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    /// Create an empty transport with no known peers.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                state: Mutex::new(HubState {
                    fail_listen: false,
                    listen_calls: 0,
                    next_endpoint: 0,
                    open_endpoints: HashSet::new(),
                    pending_inbound: VecDeque::new(),
                    peers: HashMap::new(),
                    outbound: HashMap::new(),
                }),
                cond: Condvar::new(),
                live_handles: AtomicUsize::new(0),
                max_live_handles: AtomicUsize::new(0),
                discovery_cancels: AtomicUsize::new(0),
            }),
        }
    }

    /// Register a peer reachable through [`Transport::socket`].
    pub fn add_peer(&self, address: &str, name: Option<&str>, behavior: ConnectBehavior) {
        self.hub.state.lock().peers.insert(
            address.to_string(),
            (name.map(str::to_string), behavior),
        );
    }

    /// Make every following `listen` call fail.
    pub fn set_fail_listen(&self, fail: bool) {
        self.hub.state.lock().fail_listen = fail;
    }

    /// Queue an inbound connection from a remote device.
    ///
    /// It is handed out by the next `accept` on an open endpoint.
    pub fn dial_in(&self, address: &str, name: Option<&str>) -> MemoryPeer {
        let peer = PeerIdentity::new(name.map(str::to_string), address);
        let link = Link::new(&self.hub, peer, Gate::Open);
        let mut state = self.hub.state.lock();
        state.pending_inbound.push_back(link.clone());
        self.hub.cond.notify_all();
        MemoryPeer { link }
    }

    /// Remote side of the most recent outbound handle created for `address`.
    pub fn outbound_peer(&self, address: &str) -> Option<MemoryPeer> {
        self.hub
            .state
            .lock()
            .outbound
            .get(address)
            .map(|link| MemoryPeer { link: link.clone() })
    }

    /// Handles handed to the local side and not closed yet.
    pub fn live_handles(&self) -> usize {
        self.hub.live_handles.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live handles so far.
    pub fn max_live_handles(&self) -> usize {
        self.hub.max_live_handles.load(Ordering::SeqCst)
    }

    /// Listening endpoints not closed yet.
    pub fn open_endpoints(&self) -> usize {
        self.hub.state.lock().open_endpoints.len()
    }

    /// Number of `listen` calls, failed ones included.
    pub fn listen_calls(&self) -> usize {
        self.hub.state.lock().listen_calls
    }

    /// Number of `cancel_discovery` calls.
    pub fn discovery_cancels(&self) -> usize {
        self.hub.discovery_cancels.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, service: &ServiceId) -> io::Result<Box<dyn ListenEndpoint>> {
        let mut state = self.hub.state.lock();
        state.listen_calls += 1;
        if state.fail_listen {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("service {} unavailable", service.name),
            ));
        }

        let id = state.next_endpoint;
        state.next_endpoint += 1;
        state.open_endpoints.insert(id);
        debug!("Memory endpoint {} listening for {}", id, service);

        Ok(Box::new(MemoryEndpoint {
            hub: self.hub.clone(),
            id,
        }))
    }

    fn socket(&self, peer_address: &str) -> io::Result<Arc<dyn TransportHandle>> {
        let mut state = self.hub.state.lock();
        let (name, behavior) = state.peers.get(peer_address).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown peer {}", peer_address),
            )
        })?;

        let gate = match behavior {
            ConnectBehavior::Accept => Gate::Open,
            ConnectBehavior::Refuse => Gate::Refused,
            ConnectBehavior::Hold => Gate::Pending,
        };
        let link = Link::new(
            &self.hub,
            PeerIdentity::new(name, peer_address),
            gate,
        );
        state.outbound.insert(peer_address.to_string(), link.clone());
        self.hub.track_open();

        Ok(Arc::new(MemoryHandle { link }))
    }

    fn cancel_discovery(&self) {
        self.hub.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryEndpoint {
    hub: Arc<Hub>,
    id: u64,
}

impl ListenEndpoint for MemoryEndpoint {
    fn accept(&self) -> io::Result<Arc<dyn TransportHandle>> {
        let mut state = self.hub.state.lock();
        loop {
            if !state.open_endpoints.contains(&self.id) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "endpoint closed",
                ));
            }
            if let Some(link) = state.pending_inbound.pop_front() {
                self.hub.track_open();
                return Ok(Arc::new(MemoryHandle { link }));
            }
            self.hub.cond.wait(&mut state);
        }
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.hub.state.lock();
        if state.open_endpoints.remove(&self.id) {
            debug!("Memory endpoint {} closed", self.id);
        }
        self.hub.cond.notify_all();
        Ok(())
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct MemoryHandle {
    link: Arc<Link>,
}

impl TransportHandle for MemoryHandle {
    fn connect(&self) -> io::Result<()> {
        let mut state = self.link.state.lock();
        loop {
            if state.local_closed {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "socket closed",
                ));
            }
            match state.gate {
                Gate::Open => return Ok(()),
                Gate::Refused => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ))
                }
                Gate::Pending => self.link.cond.wait(&mut state),
            }
        }
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.link.state.lock();
        state.read_calls += 1;
        loop {
            if state.local_closed {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "socket closed",
                ));
            }
            if let Some(kind) = state.failure {
                return Err(io::Error::new(kind, "link failed"));
            }
            if !state.to_local.is_empty() {
                let n = buf.len().min(state.to_local.len());
                for (slot, byte) in buf.iter_mut().zip(state.to_local.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
            self.link.cond.wait(&mut state);
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.link.state.lock();
        if state.local_closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        if state.fail_writes || state.failure.is_some() {
            return Err(io::Error::from_raw_os_error(EPIPE));
        }
        state.to_peer.extend_from_slice(bytes);
        self.link.cond.notify_all();
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.link.state.lock();
        if !state.local_closed {
            state.local_closed = true;
            if let Some(hub) = self.link.hub.upgrade() {
                hub.track_close();
            }
        }
        self.link.cond.notify_all();
        Ok(())
    }

    fn peer(&self) -> PeerIdentity {
        self.link.peer.clone()
    }
}

/// Remote end of a memory link.
#[derive(Clone)]
pub struct MemoryPeer {
    link: Arc<Link>,
}

impl MemoryPeer {
    /// Deliver bytes to the local reader.
    pub fn send(&self, bytes: &[u8]) {
        self.link
            .update(|state| state.to_local.extend(bytes.iter().copied()));
    }

    /// Everything the local side wrote so far.
    pub fn received(&self) -> Vec<u8> {
        self.link.state.lock().to_peer.clone()
    }

    /// Make pending and future local reads and writes fail with `kind`.
    pub fn fail(&self, kind: io::ErrorKind) {
        self.link.update(|state| state.failure = Some(kind));
    }

    /// End the stream; local reads return end of stream once drained.
    pub fn hang_up(&self) {
        self.link.update(|state| state.hung_up = true);
    }

    /// Make local writes fail with [`EPIPE`] while reads keep working.
    pub fn fail_writes(&self, fail: bool) {
        self.link.update(|state| state.fail_writes = fail);
    }

    /// Let a held outbound connection succeed.
    pub fn release(&self) {
        self.link.update(|state| state.gate = Gate::Open);
    }

    /// Let a held outbound connection fail.
    pub fn refuse(&self) {
        self.link.update(|state| state.gate = Gate::Refused);
    }

    /// Whether the local side closed its handle.
    pub fn is_closed(&self) -> bool {
        self.link.state.lock().local_closed
    }

    /// Number of local `read` calls on this link.
    pub fn read_calls(&self) -> usize {
        self.link.state.lock().read_calls
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.link.peer
    }
}
