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

//! BlueZ transports (classic RFCOMM and BLE GATT) over `bluer`.
//!
//! bluer is async; the session workers are plain threads. Every blocking trait call is
//! run on the tokio runtime the transport was created on, raced against the handle's
//! close signal so `close` still aborts it.
//!
//! Transport calls must come from outside the runtime's async context (session worker
//! threads or `spawn_blocking`).

mod ble;
mod rfcomm;

pub use ble::BleTransport;
pub use rfcomm::RfcommTransport;

use bluer::{Adapter, Address};
use std::future::Future;
use std::io;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::info;

use crate::transport::PeerIdentity;

/// Blocking bridge onto the runtime, with a close signal.
struct Bridge {
    runtime: Handle,
    closed: watch::Sender<bool>,
}

impl Bridge {
    fn new(runtime: Handle) -> Self {
        let (closed, _) = watch::channel(false);
        Self { runtime, closed }
    }

    /// Block on `fut` until it completes or the bridge is closed.
    fn run<F: Future>(&self, fut: F) -> io::Result<F::Output> {
        let mut closed = self.closed.subscribe();
        self.runtime.block_on(async move {
            if *closed.borrow_and_update() {
                return Err(aborted());
            }
            tokio::select! {
                out = fut => Ok(out),
                _ = closed.wait_for(|closed| *closed) => Err(aborted()),
            }
        })
    }

    /// Abort every pending and future `run`. Returns false if already closed.
    fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

fn io_err(e: bluer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket not connected")
}

/// Open a BlueZ session and power on the default adapter.
async fn default_adapter() -> bluer::Result<(bluer::Session, Adapter)> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());

    if !adapter.is_powered().await? {
        info!("Powering on Bluetooth adapter...");
        adapter.set_powered(true).await?;
    }

    Ok((session, adapter))
}

/// Resolve the alias of a known device. Unknown devices are identified by address only.
async fn peer_identity(adapter: &Adapter, address: Address) -> PeerIdentity {
    let name = match adapter.device(address) {
        Ok(device) => device.alias().await.ok(),
        Err(_) => None,
    };
    PeerIdentity::new(name, address.to_string())
}

fn parse_address(peer_address: &str) -> io::Result<Address> {
    peer_address.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid Bluetooth address: {}", peer_address),
        )
    })
}
