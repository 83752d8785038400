//! Byte transport abstraction for the access point serial link.
//!
//! This is the lowest layer of apcap. Everything else talks to the radio
//! through the [`Transport`] trait:
//! - [`SerialPort`] drives a real USB CDC / tty device (Unix, termios)
//! - [`mock::MockTransport`] replays scripted bytes (behind the `mock` feature)
//!
//! Reads may legitimately return zero bytes. Every call is bounded by a
//! timeout, so callers can poll a stop flag between calls.

pub mod error;
pub mod traits;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(unix)]
pub mod serial;

/// Line speed used by the RF access point.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

pub use error::{Result, TransportError};
pub use traits::Transport;

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort};
