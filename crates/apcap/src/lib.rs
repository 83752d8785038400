//! Telemetry capture from a USB RF access point.
//!
//! The access point relays end-device reports over a serial link using a
//! small length-prefixed framing protocol. This crate bundles the layers that
//! talk to it.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte transport trait, Unix serial port
//! - [`frame`]: wire format, receive buffer, resynchronizing frame scanner
//! - [`ap`]: start/stop handshake and background capture (behind `ap` feature)
//! - [`decode`]: telemetry and sniffer record decoding (behind `decode` feature)

/// Re-export transport types.
pub mod transport {
    pub use apcap_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use apcap_frame::*;
}

/// Re-export access point control (requires `ap` feature).
#[cfg(feature = "ap")]
pub mod ap {
    pub use apcap_ap::*;
}

/// Re-export decoders (requires `decode` feature).
#[cfg(feature = "decode")]
pub mod decode {
    pub use apcap_decode::*;
}
