//! Framing layer for the RF access point serial protocol.
//!
//! Every frame on the wire carries a 3-byte header:
//! - marker `0xFF`
//! - a type byte (`0x06` on everything the access point sends)
//! - the total frame length, header included
//!
//! The [`FrameScanner`] turns an error-prone byte stream into payloads,
//! resynchronizing on the `[0xFF, 0x06]` start sequence after corruption.
//! Input is staged in a bounded [`RxBuffer`], one per logical channel.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use buffer::RxBuffer;
pub use codec::{
    encode_frame, FrameHeader, ACK, DATA_POLL, HEADER_LEN, MARKER,
    MAX_FRAME_LEN, MAX_PAYLOAD_LEN, START, START_SEQUENCE, STOP,
};
pub use error::{FrameError, Result};
pub use reader::fill_from;
pub use scanner::{FrameScanner, ScanStats};
pub use writer::write_frame;
