//! Decoding of what the access point and the packet sniffer capture.
//!
//! - [`telemetry`]: fixed-offset end-device reports carried in access point
//!   frames, rendered as capture log rows, plus a per-link status table.
//! - [`psd`]: offline conversion of packet sniffer capture files to CSV.

pub mod error;
pub mod psd;
pub mod telemetry;

pub use error::{DecodeError, Result};
pub use psd::{convert, layout, ConvertSummary, PsdRecord, PSD_CSV_HEADER, PSD_RECORD_LEN};
pub use telemetry::{
    csv_header, BlobFormat, LinkStatus, LinkTable, TelemetryRecord, CSV_HEADER,
    MIN_TELEMETRY_LEN,
};
