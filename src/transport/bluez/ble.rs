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

//! BLE UART-style GATT link (Zum Core and compatible boards).
//!
//! The board notifies on one characteristic and accepts writes on another; together they
//! form the byte stream. Only outbound connections exist.

use bluer::gatt::remote::{Characteristic, CharacteristicReader, CharacteristicWriter};
use bluer::{Adapter, Device};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{default_adapter, io_err, not_connected, parse_address, peer_identity, Bridge};
use crate::config::BleConfig;
use crate::transport::{ListenEndpoint, PeerIdentity, ServiceId, Transport, TransportHandle};

/// ATT protocol overhead per write.
const ATT_OVERHEAD: usize = 3;

/// Payload bytes that fit one write at `mtu`.
fn effective_payload_size(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_OVERHEAD).max(1)
}

/// GATT transport on the default adapter.
pub struct BleTransport {
    runtime: Handle,
    _session: bluer::Session,
    adapter: Adapter,
    config: BleConfig,
}

impl BleTransport {
    /// Connect to BlueZ. Must be called from within a tokio runtime.
    pub async fn new(config: &BleConfig) -> anyhow::Result<Self> {
        info!("Initializing BLE transport...");
        let (session, adapter) = default_adapter().await?;

        Ok(Self {
            runtime: Handle::current(),
            _session: session,
            adapter,
            config: config.clone(),
        })
    }
}

impl Transport for BleTransport {
    fn listen(&self, _service: &ServiceId) -> io::Result<Box<dyn ListenEndpoint>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "BLE boards only accept outbound connections",
        ))
    }

    fn socket(&self, peer_address: &str) -> io::Result<Arc<dyn TransportHandle>> {
        let address = parse_address(peer_address)?;
        let device = self.adapter.device(address).map_err(io_err)?;

        Ok(Arc::new(BleHandle {
            bridge: Bridge::new(self.runtime.clone()),
            adapter: self.adapter.clone(),
            device,
            config: self.config.clone(),
            peer: Mutex::new(PeerIdentity::new(None, address.to_string())),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        }))
    }

    fn name(&self) -> &'static str {
        "ble"
    }
}

struct BleHandle {
    bridge: Bridge,
    adapter: Adapter,
    device: Device,
    config: BleConfig,
    peer: Mutex<PeerIdentity>,
    reader: tokio::sync::Mutex<Option<CharacteristicReader>>,
    writer: tokio::sync::Mutex<Option<CharacteristicWriter>>,
}

impl BleHandle {
    async fn find_characteristics(&self) -> bluer::Result<Option<(Characteristic, Characteristic)>> {
        while !self.device.is_services_resolved().await? {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for service in self.device.services().await? {
            if service.uuid().await? != self.config.service_uuid {
                continue;
            }

            let mut read = None;
            let mut write = None;
            for characteristic in service.characteristics().await? {
                let uuid: Uuid = characteristic.uuid().await?;
                if uuid == self.config.read_characteristic {
                    read = Some(characteristic);
                } else if uuid == self.config.write_characteristic {
                    write = Some(characteristic);
                }
            }
            return Ok(read.zip(write));
        }

        Ok(None)
    }

    async fn open(&self) -> io::Result<()> {
        if !self.device.is_connected().await.map_err(io_err)? {
            self.device.connect().await.map_err(io_err)?;
        }

        let (read, write) = self
            .find_characteristics()
            .await
            .map_err(io_err)?
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("service {} not offered by device", self.config.service_uuid),
                )
            })?;

        let reader = read.notify_io().await.map_err(io_err)?;
        let writer = write.write_io().await.map_err(io_err)?;
        if writer.mtu() < self.config.preferred_mtu {
            warn!(
                "Negotiated MTU {} is below the preferred {}",
                writer.mtu(),
                self.config.preferred_mtu
            );
        }
        info!("GATT link ready, MTU {}", writer.mtu());

        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        let peer = peer_identity(&self.adapter, self.device.address()).await;
        *self.peer.lock() = peer;
        Ok(())
    }
}

impl TransportHandle for BleHandle {
    fn connect(&self) -> io::Result<()> {
        self.bridge.run(self.open())?
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
                    let chunk_size = effective_payload_size(writer.mtu());
                    for chunk in bytes.chunks(chunk_size) {
                        writer.write_all(chunk).await?;
                    }
                    Ok(())
                }
                None => Err(not_connected()),
            }
        })?
    }

    fn close(&self) -> io::Result<()> {
        if !self.bridge.close() {
            return Ok(());
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        // Disconnecting needs the runtime; do not block the caller on it.
        let device = self.device.clone();
        self.bridge.runtime.spawn(async move {
            if let Err(e) = device.disconnect().await {
                debug!("BLE disconnect failed: {}", e);
            }
        });
        Ok(())
    }

    fn peer(&self) -> PeerIdentity {
        self.peer.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_payload_size() {
        assert_eq!(effective_payload_size(23), 20);
        assert_eq!(effective_payload_size(512), 509);
        assert_eq!(effective_payload_size(0), 1);
    }
}
