use crate::protocol::{ProtocolError, RawFrame, MAX_INBOUND_PAYLOAD, MAX_OUTBOUND_PAYLOAD};
use bytes::{Buf, BufMut};
use tracing::warn;

/// Width of the length prefix in front of each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthPrefix {
    /// Peer to host: one byte.
    Short,
    /// Host to peer: big-endian u16.
    Long,
}

impl LengthPrefix {
    fn width(self) -> usize {
        match self {
            LengthPrefix::Short => 1,
            LengthPrefix::Long => 2,
        }
    }

    fn max_payload(self) -> usize {
        match self {
            LengthPrefix::Short => MAX_INBOUND_PAYLOAD,
            LengthPrefix::Long => MAX_OUTBOUND_PAYLOAD,
        }
    }

    fn read(self, buf: &mut &[u8]) -> usize {
        match self {
            LengthPrefix::Short => usize::from(buf.get_u8()),
            LengthPrefix::Long => usize::from(buf.get_u16()),
        }
    }

    fn write(self, dst: &mut Vec<u8>, len: usize) {
        match self {
            LengthPrefix::Short => dst.put_u8(len as u8),
            LengthPrefix::Long => dst.put_u16(len as u16),
        }
    }
}

/// Stateless frame codec for both link directions.
///
/// The codec only moves bytes. Field endianness inside a payload is up to the
/// handler for each event id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Encodes a host-to-peer frame: `[len_hi][len_lo][event_id][payload..]`.
    pub fn encode_outbound(event_id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        encode(LengthPrefix::Long, event_id, payload)
    }

    /// Splits a buffer received from the peer (`[len][event_id][payload..]`
    /// repeated) into frames.
    pub fn decode_inbound(buffer: &[u8]) -> Vec<RawFrame> {
        decode(LengthPrefix::Short, buffer)
    }

    /// Encodes a peer-to-host frame. Used by the peer simulator and tests.
    pub fn encode_inbound(event_id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        encode(LengthPrefix::Short, event_id, payload)
    }

    /// Splits a buffer staged for the peer into frames. Used by the peer
    /// simulator and tests.
    pub fn decode_outbound(buffer: &[u8]) -> Vec<RawFrame> {
        decode(LengthPrefix::Long, buffer)
    }
}

fn encode(prefix: LengthPrefix, event_id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let max = prefix.max_payload();
    if payload.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let mut frame = Vec::with_capacity(prefix.width() + 1 + payload.len());
    prefix.write(&mut frame, payload.len() + 1);
    frame.put_u8(event_id);
    frame.put_slice(payload);
    Ok(frame)
}

fn decode(prefix: LengthPrefix, buffer: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    let mut cursor = buffer;

    while cursor.has_remaining() {
        if cursor.remaining() < prefix.width() {
            warn!(
                remaining = cursor.remaining(),
                "Dropping trailing bytes shorter than a length prefix"
            );
            break;
        }

        let len = prefix.read(&mut cursor);
        if len == 0 {
            warn!("Skipping zero-length frame");
            continue;
        }

        if cursor.remaining() < len {
            let err = ProtocolError::Truncated {
                needed: len,
                available: cursor.remaining(),
            };
            warn!(%err, "Dropping truncated trailing frame");
            break;
        }

        let event_id = cursor.get_u8();
        let body = cursor[..len - 1].to_vec();
        cursor.advance(len - 1);
        frames.push(RawFrame::new(event_id, body));
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_length_counts_event_id() {
        let frame = PacketCodec::encode_outbound(0x13, &[0x00, 0x01]).unwrap();
        assert_eq!(frame, vec![0x00, 0x03, 0x13, 0x00, 0x01]);
    }

    #[test]
    fn inbound_prefix_is_one_byte() {
        let frame = PacketCodec::encode_inbound(0x21, &[0x80, 0x7F]).unwrap();
        assert_eq!(frame, vec![0x03, 0x21, 0x80, 0x7F]);
    }

    #[test]
    fn short_prefix_remainder_is_dropped() {
        let frames = PacketCodec::decode_outbound(&[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(frames, vec![RawFrame::new(0x00, vec![])]);
    }
}
