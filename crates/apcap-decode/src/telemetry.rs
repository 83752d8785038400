use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use serde::Serialize;

use crate::error::{DecodeError, Result};

/// Bytes every telemetry payload carries before the optional sensor blob.
pub const MIN_TELEMETRY_LEN: usize = 15;

/// Offset where the sensor blob (tagged battery/temperature) starts.
pub const BLOB_OFFSET: usize = 15;

const BATTERY_TAG: u8 = b'B';
const TEMPERATURE_TAG: u8 = b'T';

/// Column header of the capture log.
pub const CSV_HEADER: &str =
    "localTime,linkId,apCounter,sourceCounter,timestamp,RSSI,LQI,FCS,temperature,battery";

/// Header line, with the blob column appended when one is rendered.
pub fn csv_header(with_blob: bool) -> String {
    if with_blob {
        format!("{CSV_HEADER},blob")
    } else {
        CSV_HEADER.to_string()
    }
}

/// One decoded end-device report as relayed by the access point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub link_id: u8,
    /// Access point's own packet counter.
    pub ap_counter: u16,
    pub rssi: i8,
    pub lqi: u8,
    pub fcs_ok: bool,
    /// Device clock, Unix seconds.
    pub timestamp: u32,
    pub milliseconds: u16,
    /// End device's packet counter.
    pub source_counter: u32,
    pub battery_volts: Option<f32>,
    pub temperature_c: Option<f32>,
    /// Everything from the sensor blob offset on.
    pub blob: Vec<u8>,
}

impl TelemetryRecord {
    /// Decode a frame payload. Multi-byte fields are little-endian.
    ///
    /// ```text
    /// [0] link  [1..3] AP counter  [3] RSSI  [4] LQI | FCS error (bit 7)
    /// [5..9] timestamp  [9..11] ms  [11..15] device counter
    /// [15] 'B' [16..18] battery cV  [18] 'T' [19..21] temperature d°C
    /// ```
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < MIN_TELEMETRY_LEN {
            return Err(DecodeError::TooShort {
                len: payload.len(),
                min: MIN_TELEMETRY_LEN,
            });
        }

        let battery_volts = match payload.get(15..18) {
            Some([BATTERY_TAG, lo, hi]) => Some(f32::from(u16::from_le_bytes([*lo, *hi])) / 100.0),
            _ => None,
        };
        let temperature_c = match payload.get(18..21) {
            Some([TEMPERATURE_TAG, lo, hi]) => {
                Some(f32::from(i16::from_le_bytes([*lo, *hi])) / 10.0)
            }
            _ => None,
        };

        Ok(Self {
            link_id: payload[0],
            ap_counter: u16::from_le_bytes([payload[1], payload[2]]),
            rssi: payload[3] as i8,
            lqi: payload[4] & 0x7F,
            fcs_ok: payload[4] & 0x80 == 0,
            timestamp: u32::from_le_bytes([payload[5], payload[6], payload[7], payload[8]]),
            milliseconds: u16::from_le_bytes([payload[9], payload[10]]),
            source_counter: u32::from_le_bytes([
                payload[11],
                payload[12],
                payload[13],
                payload[14],
            ]),
            battery_volts,
            temperature_c,
            blob: payload[BLOB_OFFSET..].to_vec(),
        })
    }

    /// Device timestamp in local time, if representable.
    pub fn device_time(&self) -> Option<DateTime<Local>> {
        Local
            .timestamp_opt(i64::from(self.timestamp), 0)
            .earliest()
    }

    /// One capture log line (no trailing newline). Missing sensor values are
    /// written as `0`.
    pub fn csv_row(&self, received_at: NaiveTime, blob: Option<BlobFormat>) -> String {
        let device_time = match self.device_time() {
            Some(time) => time.format("%c").to_string(),
            None => self.timestamp.to_string(),
        };
        let mut row = format!(
            "{},{},{},{},\"{};{}\",{},{},{},{},{}",
            received_at.format("%H:%M:%S"),
            self.link_id,
            self.ap_counter,
            self.source_counter,
            device_time,
            self.milliseconds,
            self.rssi,
            self.lqi,
            if self.fcs_ok { "OK" } else { "ERROR" },
            self.temperature_c.unwrap_or(0.0),
            self.battery_volts.unwrap_or(0.0),
        );
        if let Some(format) = blob {
            row.push(',');
            row.push_str(&csv_quote(&format.render(&self.blob)));
        }
        row
    }
}

/// How the raw sensor blob column is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobFormat {
    /// Decimal byte values.
    #[default]
    Number,
    /// Uppercase two-digit hex.
    Hex,
    /// Printable ASCII, `.` for anything else.
    Ascii,
}

impl BlobFormat {
    /// Render `bytes` space-separated.
    pub fn render(self, bytes: &[u8]) -> String {
        let parts: Vec<String> = match self {
            BlobFormat::Number => bytes.iter().map(|b| b.to_string()).collect(),
            BlobFormat::Hex => bytes.iter().map(|b| format!("{b:02X}")).collect(),
            BlobFormat::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() {
                        char::from(b).to_string()
                    } else {
                        ".".to_string()
                    }
                })
                .collect(),
        };
        parts.join(" ")
    }
}

impl fmt::Display for BlobFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobFormat::Number => f.write_str("number"),
            BlobFormat::Hex => f.write_str("hex"),
            BlobFormat::Ascii => f.write_str("ascii"),
        }
    }
}

impl FromStr for BlobFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "number" => Ok(BlobFormat::Number),
            "hex" => Ok(BlobFormat::Hex),
            "ascii" => Ok(BlobFormat::Ascii),
            other => Err(format!(
                "unknown blob format '{other}' (expected number, hex or ascii)"
            )),
        }
    }
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Latest sensor values for one link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinkStatus {
    pub temperature_c: f32,
    pub battery_volts: f32,
    pub last_counter: u32,
}

/// Latest status per link id, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: BTreeMap<u8, LinkStatus>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for the record's link.
    pub fn update(&mut self, record: &TelemetryRecord) {
        self.links.insert(
            record.link_id,
            LinkStatus {
                temperature_c: record.temperature_c.unwrap_or(0.0),
                battery_volts: record.battery_volts.unwrap_or(0.0),
                last_counter: record.source_counter,
            },
        );
    }

    pub fn get(&self, link_id: u8) -> Option<&LinkStatus> {
        self.links.get(&link_id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &LinkStatus)> {
        self.links.iter().map(|(id, status)| (*id, status))
    }

    /// Single console line summarizing every known link.
    pub fn status_line(&self) -> String {
        self.iter()
            .map(|(id, status)| {
                format!(
                    "Link {id} temperature: {}C, battery voltage: {}V.",
                    status.temperature_c, status.battery_volts
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
