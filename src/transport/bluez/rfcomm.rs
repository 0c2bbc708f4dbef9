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

//! Classic Bluetooth serial (SPP) over RFCOMM sockets.

use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{Listener, SocketAddr, Stream};
use bluer::{Adapter, Address};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::{default_adapter, not_connected, parse_address, peer_identity, Bridge};
use crate::config::RfcommConfig;
use crate::transport::{ListenEndpoint, PeerIdentity, ServiceId, Transport, TransportHandle};

/// RFCOMM transport on the default adapter.
pub struct RfcommTransport {
    runtime: Handle,
    _session: bluer::Session,
    adapter: Adapter,
    channel: u8,
}

impl RfcommTransport {
    /// Connect to BlueZ. Must be called from within a tokio runtime, which then serves
    /// every socket of this transport.
    pub async fn new(config: &RfcommConfig) -> anyhow::Result<Self> {
        info!("Initializing RFCOMM transport...");
        let (session, adapter) = default_adapter().await?;

        // Boards pair from their side, so stay visible.
        adapter.set_discoverable(true).await?;
        adapter.set_pairable(true).await?;
        info!("Adapter is discoverable and pairable");

        Ok(Self {
            runtime: Handle::current(),
            _session: session,
            adapter,
            channel: config.channel,
        })
    }
}

impl Transport for RfcommTransport {
    fn listen(&self, service: &ServiceId) -> io::Result<Box<dyn ListenEndpoint>> {
        let bridge = Bridge::new(self.runtime.clone());
        let local_addr = SocketAddr::new(Address::any(), self.channel);
        let listener = bridge.run(Listener::bind(local_addr))??;
        info!(
            "RFCOMM server listening on channel {} for {}",
            self.channel, service
        );

        Ok(Box::new(RfcommEndpoint {
            bridge,
            listener,
            adapter: self.adapter.clone(),
        }))
    }

    fn socket(&self, peer_address: &str) -> io::Result<Arc<dyn TransportHandle>> {
        let address = parse_address(peer_address)?;
        Ok(Arc::new(RfcommHandle::new(
            self.runtime.clone(),
            PeerIdentity::new(None, address.to_string()),
            Some((self.adapter.clone(), SocketAddr::new(address, self.channel))),
            None,
        )))
    }

    fn name(&self) -> &'static str {
        "rfcomm"
    }
}

struct RfcommEndpoint {
    bridge: Bridge,
    listener: Listener,
    adapter: Adapter,
}

impl ListenEndpoint for RfcommEndpoint {
    fn accept(&self) -> io::Result<Arc<dyn TransportHandle>> {
        let (stream, remote) = self.bridge.run(self.listener.accept())??;
        let peer = self.bridge.run(peer_identity(&self.adapter, remote.addr))?;
        debug!("Accepted RFCOMM stream from {}", peer);

        Ok(Arc::new(RfcommHandle::new(
            self.bridge.runtime.clone(),
            peer,
            None,
            Some(stream),
        )))
    }

    fn close(&self) -> io::Result<()> {
        if self.bridge.close() {
            debug!("RFCOMM listener closed");
        }
        Ok(())
    }
}

/// One RFCOMM stream. Outbound handles carry their target until `connect`.
struct RfcommHandle {
    bridge: Bridge,
    peer: Mutex<PeerIdentity>,
    target: Option<(Adapter, SocketAddr)>,
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl RfcommHandle {
    fn new(
        runtime: Handle,
        peer: PeerIdentity,
        target: Option<(Adapter, SocketAddr)>,
        stream: Option<Stream>,
    ) -> Self {
        let (reader, writer) = match stream.map(Stream::into_split) {
            Some((reader, writer)) => (Some(reader), Some(writer)),
            None => (None, None),
        };
        Self {
            bridge: Bridge::new(runtime),
            peer: Mutex::new(peer),
            target,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

impl TransportHandle for RfcommHandle {
    fn connect(&self) -> io::Result<()> {
        let Some((adapter, target)) = &self.target else {
            return Ok(());
        };

        let stream = self.bridge.run(Stream::connect(*target))??;
        let peer = self.bridge.run(peer_identity(adapter, target.addr))?;
        let (reader, writer) = stream.into_split();

        self.bridge.run(async {
            *self.reader.lock().await = Some(reader);
            *self.writer.lock().await = Some(writer);
        })?;
        *self.peer.lock() = peer;
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.bridge.run(async {
            match self.reader.lock().await.as_mut() {
                Some(reader) => reader.read(buf).await,
                None => Err(not_connected()),
            }
        })?
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.bridge.run(async {
            match self.writer.lock().await.as_mut() {
                Some(writer) => {
                    writer.write_all(bytes).await?;
                    writer.flush().await
                }
                None => Err(not_connected()),
            }
        })?
    }

    fn close(&self) -> io::Result<()> {
        if !self.bridge.close() {
            return Ok(());
        }
        // Pending calls release their half once aborted; drop what is free now.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        debug!("RFCOMM stream to {} closed", self.peer.lock());
        Ok(())
    }

    fn peer(&self) -> PeerIdentity {
        self.peer.lock().clone()
    }
}
