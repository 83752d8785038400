//! Packet sniffer capture files.
//!
//! A `.psd` file is a flat sequence of fixed 271-byte records, one per sniffed
//! radio packet. Only the network-layer fields and the radio status trailer
//! are decoded; everything else in a record is ignored.

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DecodeError, Result};

/// Size of one sniffer record.
pub const PSD_RECORD_LEN: usize = 271;

/// Largest application payload a record can describe.
pub const MAX_APP_DATA_LEN: usize = 50;

/// Column header of the converted file.
pub const PSD_CSV_HEADER: &str = "packetNr,destination,source,port,transactionID,packet,RSSI,LQI,FCS";

const DATA_LEN_OFFSET: usize = 15;
const DESTINATION_OFFSET: usize = 16;
const SOURCE_OFFSET: usize = 20;
const PORT_OFFSET: usize = 24;
const TRANSACTION_OFFSET: usize = 26;
const APP_DATA_OFFSET: usize = 27;
// Network header bytes counted in the data length byte.
const NETWORK_OVERHEAD: usize = 11;
const RSSI_OFFSET_DB: i16 = 72;

/// Decoded sniffer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PsdRecord {
    pub destination: [u8; 4],
    pub source: [u8; 4],
    pub port: u8,
    pub transaction_id: u8,
    /// Application payload; `None` when the record carries none.
    pub data: Option<Vec<u8>>,
    pub rssi: i8,
    pub lqi: u8,
    pub fcs_ok: bool,
}

impl PsdRecord {
    /// Decode one record.
    ///
    /// A data length that implies more than [`MAX_APP_DATA_LEN`] application
    /// bytes (or fewer than zero) marks a corrupted capture: the record is
    /// kept with FCS failed and zero RSSI/LQI.
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < PSD_RECORD_LEN {
            return Err(DecodeError::TooShort {
                len: record.len(),
                min: PSD_RECORD_LEN,
            });
        }

        let mut destination = [0u8; 4];
        destination.copy_from_slice(&record[DESTINATION_OFFSET..DESTINATION_OFFSET + 4]);
        let mut source = [0u8; 4];
        source.copy_from_slice(&record[SOURCE_OFFSET..SOURCE_OFFSET + 4]);

        let mut parsed = Self {
            destination,
            source,
            port: record[PORT_OFFSET],
            transaction_id: record[TRANSACTION_OFFSET],
            data: None,
            rssi: 0,
            lqi: 0,
            fcs_ok: false,
        };

        let app_len = match usize::from(record[DATA_LEN_OFFSET]).checked_sub(NETWORK_OVERHEAD) {
            Some(len) if len <= MAX_APP_DATA_LEN => len,
            _ => return Ok(parsed),
        };

        if app_len > 0 {
            parsed.data = Some(record[APP_DATA_OFFSET..APP_DATA_OFFSET + app_len].to_vec());
        }

        let raw_rssi = i16::from(record[APP_DATA_OFFSET + app_len] as i8);
        parsed.rssi = (raw_rssi / 2 - RSSI_OFFSET_DB).max(i16::from(i8::MIN)) as i8;

        let status = record[APP_DATA_OFFSET + app_len + 1];
        parsed.fcs_ok = status & 0x80 != 0;
        parsed.lqi = status & 0x7F;
        Ok(parsed)
    }

    /// One converted line (no trailing newline). Records are numbered from 1.
    pub fn csv_row(&self, packet_nr: u64) -> String {
        let data = match &self.data {
            Some(bytes) => quoted_hex(bytes),
            None => "EMPTY".to_string(),
        };
        format!(
            "{packet_nr},{},{},{},{},{data},{},{},{}",
            quoted_hex(&self.destination),
            quoted_hex(&self.source),
            self.port,
            self.transaction_id,
            self.rssi,
            self.lqi,
            if self.fcs_ok { "OK" } else { "ERROR" },
        )
    }
}

fn quoted_hex(bytes: &[u8]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("\"{}\"", hex.join(" "))
}

/// Records and leftover bytes a capture of `len` bytes splits into.
pub fn layout(len: u64) -> (u64, u64) {
    let record = PSD_RECORD_LEN as u64;
    (len / record, len % record)
}

/// Outcome of a [`convert`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvertSummary {
    pub records: u64,
    /// Bytes after the last complete record, ignored.
    pub trailing_bytes: u64,
}

/// Convert a sniffer capture to CSV.
///
/// `progress` is called with the running record count after each row.
pub fn convert<R, W, F>(mut input: R, mut output: W, mut progress: F) -> Result<ConvertSummary>
where
    R: Read,
    W: Write,
    F: FnMut(u64),
{
    writeln!(output, "{PSD_CSV_HEADER}")?;

    let mut summary = ConvertSummary::default();
    let mut record = [0u8; PSD_RECORD_LEN];
    loop {
        let filled = read_record(&mut input, &mut record)?;
        if filled < PSD_RECORD_LEN {
            summary.trailing_bytes = filled as u64;
            break;
        }

        let parsed = PsdRecord::parse(&record)?;
        summary.records += 1;
        writeln!(output, "{}", parsed.csv_row(summary.records))?;
        progress(summary.records);
    }
    output.flush()?;

    if summary.trailing_bytes > 0 {
        warn!(
            trailing_bytes = summary.trailing_bytes,
            "capture ends with a partial record, ignored"
        );
    }
    debug!(records = summary.records, "sniffer capture converted");
    Ok(summary)
}

// Fill `record` unless the input ends first; returns the bytes read.
fn read_record<R: Read>(input: &mut R, record: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < record.len() {
        match input.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}
