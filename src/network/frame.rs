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


use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{AppError, AppResult};

/// Size of the big-endian length prefix. The length counts the prefix itself.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Re-assembles length-prefixed frames from the chunks a transport hands out.
///
/// Chunks may carry several frames or a fraction of one; whatever is left after the last
/// complete frame stays buffered for the next chunk.
#[derive(Debug)]
pub struct FrameSplitter {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameSplitter {
    pub fn new(max_frame_size: usize, capacity: usize) -> FrameSplitter {
        FrameSplitter {
            buffer: BytesMut::with_capacity(capacity),
            max_frame_size,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered that do not form a complete frame yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the next complete frame body, prefix stripped.
    ///
    /// An error means the stream is out of sync and the connection has to be dropped, frame
    /// boundaries cannot be recovered.
    pub fn next_frame(&mut self) -> AppResult<Option<Bytes>> {
        match self.check()? {
            Some(frame_length) => {
                let mut frame = self.buffer.split_to(frame_length);
                frame.advance(LENGTH_FIELD_SIZE);
                Ok(Some(frame.freeze()))
            }
            None => Ok(None),
        }
    }

    fn check(&mut self) -> AppResult<Option<usize>> {
        if self.buffer.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }
        let mut length_field = &self.buffer[..LENGTH_FIELD_SIZE];
        let frame_length = length_field.get_u32() as usize;
        if frame_length < LENGTH_FIELD_SIZE {
            return Err(AppError::Transport(format!(
                "frame length {} shorter than its prefix",
                frame_length
            )));
        }
        if frame_length > self.max_frame_size {
            return Err(AppError::Transport(format!(
                "frame of length {} is too large, max {}",
                frame_length, self.max_frame_size
            )));
        }
        if self.buffer.len() < frame_length {
            self.buffer.reserve(frame_length - self.buffer.len());
            return Ok(None);
        }
        Ok(Some(frame_length))
    }
}

/// Prefixes `body` with its length, the prefix included.
pub fn encode_frame(body: &[u8]) -> AppResult<Bytes> {
    let frame_length = body.len() + LENGTH_FIELD_SIZE;
    let length_field = u32::try_from(frame_length)
        .map_err(|_| AppError::InvalidValue(format!("frame body of {} bytes", body.len())))?;
    let mut frame = BytesMut::with_capacity(frame_length);
    frame.put_u32(length_field);
    frame.put_slice(body);
    Ok(frame.freeze())
}
