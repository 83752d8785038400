use std::io::{IsTerminal, Write};
use std::path::Path;

use apcap_ap::CaptureReport;
use apcap_decode::{ConvertSummary, LinkTable, TelemetryRecord};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    received_at: String,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Console output for one decoded frame.
pub fn print_record(record: &TelemetryRecord, payload: &[u8], links: &LinkTable, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = RecordOutput {
                received_at: chrono::Local::now().to_rfc3339(),
                record,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LINK", "COUNTER", "RSSI", "LQI", "FCS", "TEMP", "BATTERY"])
                .add_row(vec![
                    record.link_id.to_string(),
                    record.source_counter.to_string(),
                    record.rssi.to_string(),
                    record.lqi.to_string(),
                    fcs_label(record.fcs_ok).to_string(),
                    optional(record.temperature_c, "C"),
                    optional(record.battery_volts, "V"),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            // Overwrite one status line, the way a serial console monitor does.
            let mut out = std::io::stdout();
            let _ = write!(out, "\r{}    ", links.status_line());
            let _ = out.flush();
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[derive(Serialize)]
struct CaptureOutput<'a> {
    log_file: String,
    #[serde(flatten)]
    report: &'a CaptureReport,
    decode_failures: u64,
}

pub fn print_capture_report(
    report: &CaptureReport,
    log_file: &Path,
    decode_failures: u64,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = CaptureOutput {
                log_file: log_file.display().to_string(),
                report,
                decode_failures,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            let stats = &report.stats;
            for (field, value) in [
                ("log_file", log_file.display().to_string()),
                ("frames", stats.frames_emitted.to_string()),
                ("bytes", stats.bytes_received.to_string()),
                ("bytes_discarded", stats.bytes_discarded.to_string()),
                ("resyncs", stats.resyncs.to_string()),
                ("malformed", stats.malformed.to_string()),
                ("decode_failures", decode_failures.to_string()),
                ("stop_acknowledged", report.stop_acknowledged.to_string()),
            ] {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!();
            println!(
                "Packets received: {}. In total {} bytes.",
                report.stats.frames_emitted, report.stats.bytes_received
            );
            println!("Log written to {}", log_file.display());
        }
    }
}

#[derive(Serialize)]
struct ConvertOutput<'a> {
    input: String,
    output: String,
    #[serde(flatten)]
    summary: &'a ConvertSummary,
}

pub fn print_convert_summary(
    summary: &ConvertSummary,
    input: &Path,
    output: &Path,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = ConvertOutput {
                input: input.display().to_string(),
                output: output.display().to_string(),
                summary,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INPUT", "OUTPUT", "RECORDS", "TRAILING BYTES"])
                .add_row(vec![
                    input.display().to_string(),
                    output.display().to_string(),
                    summary.records.to_string(),
                    summary.trailing_bytes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "{} packets parsed from {} into {}.",
                summary.records,
                input.display(),
                output.display()
            );
            if summary.trailing_bytes > 0 {
                println!("File offset byte count: {}.", summary.trailing_bytes);
            }
        }
    }
}

fn fcs_label(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "ERROR"
    }
}

fn optional(value: Option<f32>, unit: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}{unit}"))
}
