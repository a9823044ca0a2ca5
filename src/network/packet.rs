// Copyright 2025 jonefeewang@gmail.com
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


use bytes::Bytes;
use chrono::{DateTime, Local};

/// A logical request on its way out, before the codec turns it into a frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub command: String,
    pub payload: Bytes,
    /// Assigned by the correlator when a response is expected.
    pub sequence: Option<u32>,
}

impl OutgoingPacket {
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        OutgoingPacket {
            command: command.into(),
            payload: payload.into(),
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingFrame {
    pub command: String,
    /// Absent for unsolicited pushes.
    pub sequence: Option<u32>,
    pub payload: Bytes,
    pub received_at: DateTime<Local>,
}

impl IncomingFrame {
    pub fn new(command: impl Into<String>, sequence: Option<u32>, payload: impl Into<Bytes>) -> Self {
        IncomingFrame {
            command: command.into(),
            sequence,
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

/// Keys negotiated by the key exchange, opaque to the engine and handed to the codec as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeys {
    pub session_key: Bytes,
    pub token: Bytes,
}
