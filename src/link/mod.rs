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

//! Link session: state machine, workers and the frame protocol.

mod connection;
mod connector;
pub mod framing;
mod server;
mod session;

pub use framing::{encode_frame, FrameDecoder, FrameError, END_DELIMITER, START_DELIMITER};
pub use session::LinkSession;
