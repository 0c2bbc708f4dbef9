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

//! `&&payload%%` frame extraction and encoding.

use thiserror::Error;
use tracing::debug;

/// Marks the beginning of a frame.
pub const START_DELIMITER: &[u8] = b"&&";

/// Marks the end of a frame.
pub const END_DELIMITER: &[u8] = b"%%";

/// A payload that cannot be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload contains the start delimiter \"&&\"")]
    ContainsStartDelimiter,
    #[error("payload contains the end delimiter \"%%\"")]
    ContainsEndDelimiter,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Accumulates raw reads and extracts complete frames.
///
/// One decoder lives for exactly one connection.
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Append one read and return every frame it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }

        if !self.buffer.is_empty() {
            debug!("Pending frame buffer: {} bytes", self.buffer.len());
        }
        frames
    }

    /// Extract the first complete frame, if the buffer holds one.
    ///
    /// Both delimiters are searched from the start of the buffer. A frame exists only when
    /// the first start delimiter comes before the first end delimiter. Everything up to and
    /// including that end delimiter is dropped afterwards.
    fn next_frame(&mut self) -> Option<String> {
        let start = find(&self.buffer, START_DELIMITER)?;
        let end = find(&self.buffer, END_DELIMITER)?;
        if start >= end {
            return None;
        }

        let payload_start = start + START_DELIMITER.len();
        let frame = String::from_utf8_lossy(&self.buffer[payload_start..end]).into_owned();
        self.buffer.drain(..end + END_DELIMITER.len());
        Some(frame)
    }

    /// Bytes waiting for a complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a payload in frame delimiters.
pub fn encode_frame(payload: &str) -> Result<Vec<u8>, FrameError> {
    let bytes = payload.as_bytes();
    if find(bytes, START_DELIMITER).is_some() {
        return Err(FrameError::ContainsStartDelimiter);
    }
    if find(bytes, END_DELIMITER).is_some() {
        return Err(FrameError::ContainsEndDelimiter);
    }

    let mut frame = Vec::with_capacity(bytes.len() + START_DELIMITER.len() + END_DELIMITER.len());
    frame.extend_from_slice(START_DELIMITER);
    frame.extend_from_slice(bytes);
    frame.extend_from_slice(END_DELIMITER);
    Ok(frame)
}
