use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: marker (1) + type (1) + total length (1) = 3 bytes.
pub const HEADER_LEN: usize = 3;

/// Synchronization byte that opens every frame.
pub const MARKER: u8 = 0xFF;

/// Host → access point: start the radio and begin streaming.
pub const START: u8 = 0x07;

/// Host → access point: poll for buffered radio data.
pub const DATA_POLL: u8 = 0x08;

/// Host → access point: stop the radio.
pub const STOP: u8 = 0x09;

/// Access point → host: "no error". Acknowledgements echo the request with
/// this type byte, and the access point stamps it on every data frame too.
pub const ACK: u8 = 0x06;

/// Sequence the scanner resynchronizes on.
///
/// This is `[MARKER, ACK]`, not `[MARKER, <any type>]`: the access point emits
/// the acknowledgement code as the type byte of every frame it sends, data
/// frames included. Compatibility-sensitive; do not widen it to other type
/// codes without checking against the device firmware.
pub const START_SEQUENCE: [u8; 2] = [MARKER, ACK];

/// Largest frame a length byte can describe.
pub const MAX_FRAME_LEN: usize = u8::MAX as usize;

/// Largest payload that fits in one frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Type code (byte 1).
    pub frame_type: u8,
    /// Total frame length including the header (byte 2).
    pub total_len: u8,
}

impl FrameHeader {
    /// Header of a frame with no payload, as used by control commands.
    pub fn empty(frame_type: u8) -> Self {
        Self {
            frame_type,
            total_len: HEADER_LEN as u8,
        }
    }

    /// Parse a header from the first three bytes of `src`.
    ///
    /// Returns `None` when fewer than three bytes are available or the first
    /// byte is not the marker.
    pub fn parse(src: &[u8]) -> Option<Self> {
        match src {
            [MARKER, frame_type, total_len, ..] => Some(Self {
                frame_type: *frame_type,
                total_len: *total_len,
            }),
            _ => None,
        }
    }

    /// Payload bytes following the header, or `None` for a length byte below
    /// the header size.
    pub fn payload_len(&self) -> Option<usize> {
        (self.total_len as usize).checked_sub(HEADER_LEN)
    }

    /// Encode the header.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        [MARKER, self.frame_type, self.total_len]
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────┬────────┬──────────────┬──────────────────────┐
/// │ Marker │ Type   │ Total length │ Payload              │
/// │ 0xFF   │ (1B)   │ (1B, ≥ 3)    │ (length - 3 bytes)   │
/// └────────┴────────┴──────────────┴──────────────────────┘
/// ```
pub fn encode_frame(frame_type: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let header = FrameHeader {
        frame_type,
        total_len: (HEADER_LEN + payload.len()) as u8,
    };
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&header.to_bytes());
    dst.put_slice(payload);
    Ok(())
}
