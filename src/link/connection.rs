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

//! An established connection: frame reader loop and writer.

use std::io;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::framing::FrameDecoder;
use super::session::Shared;
use crate::transport::{PeerIdentity, TransportHandle};

/// Reader/writer pair over one connected handle.
pub(crate) struct Connection {
    id: u64,
    handle: Arc<dyn TransportHandle>,
    peer: PeerIdentity,
    duplex: bool,
}

impl Connection {
    pub(crate) fn new(id: u64, handle: Arc<dyn TransportHandle>, duplex: bool) -> Self {
        let peer = handle.peer();
        Self {
            id,
            handle,
            peer,
            duplex,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub(crate) fn is_duplex(&self) -> bool {
        self.duplex
    }

    /// Write to the connected stream.
    pub(crate) fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.handle.write(bytes)
    }

    /// Close the stream. This is what ends the reader loop.
    pub(crate) fn cancel(&self) {
        if let Err(e) = self.handle.close() {
            error!("close() of connected socket failed: {}", e);
        }
    }

    /// Run the frame reader until the stream fails or the session moves on.
    pub(crate) fn read_loop(self: Arc<Self>, shared: Arc<Shared>, chunk_size: usize) {
        info!("Frame reader started for {}", self.peer);

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; chunk_size.max(1)];

        while shared.is_reading(self.id) {
            match self.handle.read(&mut buf) {
                Ok(0) => {
                    info!("Connection closed by remote");
                    shared.connection_lost(
                        self.id,
                        io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"),
                    );
                    break;
                }
                Ok(n) => {
                    debug!("Received {} bytes", n);
                    let frames = decoder.push(&buf[..n]);
                    if !frames.is_empty() {
                        shared.frames_received(self.id, frames);
                    }
                }
                Err(e) => {
                    debug!("Read error: {}", e);
                    shared.connection_lost(self.id, e);
                    break;
                }
            }
        }

        debug!(
            "Frame reader for {} stopped, discarding {} pending bytes",
            self.peer,
            decoder.buffer_size()
        );
    }
}
