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

//! Interactive chat with a board over Bluetooth.
//!
//! Usage: ino_chat [--ble] [--simplex] [ADDRESS]
//!
//! Without an address the session waits for the board to connect. Every stdin line is
//! sent as a `&&line%%` frame; `/raw TEXT` sends text unframed and `/quit` exits.

use anyhow::{bail, Result};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inolink::transport::bluez::{BleTransport, RfcommTransport};
use inolink::{ChannelSink, Config, LinkEvent, LinkSession, Transport};

struct Args {
    ble: bool,
    simplex: bool,
    address: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        ble: false,
        simplex: false,
        address: None,
    };
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--ble" => args.ble = true,
            "--simplex" => args.simplex = true,
            flag if flag.starts_with("--") => {
                bail!("unknown option {}\nusage: ino_chat [--ble] [--simplex] [ADDRESS]", flag)
            }
            _ => args.address = Some(arg),
        }
    }
    Ok(args)
}

/// Run a blocking session call off the async runtime.
async fn blocking<T, F>(session: &Arc<LinkSession>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&LinkSession) -> T + Send + 'static,
{
    let session = session.clone();
    Ok(tokio::task::spawn_blocking(move || f(&session)).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("inolink=info".parse()?))
        .init();

    let args = parse_args()?;
    info!("Starting ino_chat v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let transport: Arc<dyn Transport> = if args.ble {
        Arc::new(BleTransport::new(&config.ble).await?)
    } else {
        Arc::new(RfcommTransport::new(&config.rfcomm).await?)
    };

    let (sink, mut events) = ChannelSink::channel();
    let session = Arc::new(LinkSession::new(transport, Arc::new(sink), config.link.clone()));
    if args.simplex {
        session.set_duplex(false);
    }

    blocking(&session, |session| session.start()).await?;
    if let Some(address) = args.address.clone() {
        blocking(&session, move |session| session.connect(&address)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                LinkEvent::StateChanged(state) => info!("State: {}", state),
                LinkEvent::PeerIdentified(name) => println!("* connected to {}", name),
                LinkEvent::MessageReceived(message) => println!("< {}", message),
                LinkEvent::MessageSent(bytes) => println!("> {}", String::from_utf8_lossy(&bytes)),
                LinkEvent::Error(report) => error!("{}: {}", report.message, report.cause),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim().to_string();
                if line == "/quit" {
                    break;
                }

                if line.is_empty() {
                    continue;
                }

                let raw = line.strip_prefix("/raw ").map(str::to_string);
                let result = match raw {
                    Some(text) => blocking(&session, move |session| session.send_text(&text)).await?,
                    None => blocking(&session, move |session| session.send_frame(&line)).await?,
                };
                if let Err(e) = result {
                    warn!("Not sent: {}", e);
                }
            }
        }
    }

    info!("Shutting down...");
    blocking(&session, |session| session.stop()).await?;
    Ok(())
}
