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

use super::packet::{IncomingFrame, OutgoingPacket, SessionKeys};
use crate::{AppError, AppResult};

/// Turns logical packets into frame bodies and back. The length prefix is not part of the
/// body, framing is done by the network layer.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, keys: &SessionKeys, packet: &OutgoingPacket) -> AppResult<Bytes>;

    /// An error drops this frame only, the connection stays up.
    fn decode(&self, keys: &SessionKeys, body: Bytes) -> AppResult<IncomingFrame>;
}

const FLAG_HAS_SEQUENCE: u8 = 0x01;

/// Plain body layout, no encryption:
///
/// ```text
/// flags: u8 | sequence: u32 | command length: u16 | command: utf8 | payload
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPacketCodec;

impl PacketCodec for BasicPacketCodec {
    fn encode(&self, _keys: &SessionKeys, packet: &OutgoingPacket) -> AppResult<Bytes> {
        let command_len = u16::try_from(packet.command.len()).map_err(|_| {
            AppError::InvalidValue(format!("command name of {} bytes", packet.command.len()))
        })?;
        let mut body = BytesMut::with_capacity(7 + packet.command.len() + packet.payload.len());
        match packet.sequence {
            Some(sequence) => {
                body.put_u8(FLAG_HAS_SEQUENCE);
                body.put_u32(sequence);
            }
            None => {
                body.put_u8(0);
                body.put_u32(0);
            }
        }
        body.put_u16(command_len);
        body.put_slice(packet.command.as_bytes());
        body.put_slice(&packet.payload);
        Ok(body.freeze())
    }

    fn decode(&self, _keys: &SessionKeys, mut body: Bytes) -> AppResult<IncomingFrame> {
        if body.remaining() < 7 {
            return Err(AppError::MalformedFrame(format!(
                "body of {} bytes has no header",
                body.remaining()
            )));
        }
        let flags = body.get_u8();
        let sequence = body.get_u32();
        let command_len = body.get_u16() as usize;
        if body.remaining() < command_len {
            return Err(AppError::MalformedFrame(format!(
                "command length {} exceeds remaining {} bytes",
                command_len,
                body.remaining()
            )));
        }
        let command = String::from_utf8(body.split_to(command_len).to_vec())
            .map_err(|e| AppError::MalformedFrame(format!("command is not utf8: {e}")))?;
        let sequence = (flags & FLAG_HAS_SEQUENCE != 0).then_some(sequence);
        Ok(IncomingFrame::new(command, sequence, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_its_sequence() {
        let codec = BasicPacketCodec;
        let keys = SessionKeys::default();
        let packet = OutgoingPacket::new("Friend.GetList", Bytes::from_static(b"\x01\x02"))
            .with_sequence(42);

        let frame = codec
            .decode(&keys, codec.encode(&keys, &packet).unwrap())
            .unwrap();
        assert_eq!(frame.command, "Friend.GetList");
        assert_eq!(frame.sequence, Some(42));
        assert_eq!(frame.payload, Bytes::from_static(b"\x01\x02"));
    }

    #[test]
    fn push_has_no_sequence() {
        let codec = BasicPacketCodec;
        let keys = SessionKeys::default();
        let body = codec
            .encode(&keys, &OutgoingPacket::new("OnlinePush.ReqPush", Bytes::new()))
            .unwrap();
        assert_eq!(codec.decode(&keys, body).unwrap().sequence, None);
    }

    #[test]
    fn truncated_command_is_malformed() {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_u32(0);
        body.put_u16(10);
        body.put_slice(b"abc");
        let error = BasicPacketCodec
            .decode(&SessionKeys::default(), body.freeze())
            .unwrap_err();
        assert!(matches!(error, AppError::MalformedFrame(_)));
    }
}
