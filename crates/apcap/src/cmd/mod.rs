use std::path::PathBuf;
use std::time::Duration;

use apcap_decode::BlobFormat;
use apcap_transport::DEFAULT_BAUD_RATE;
use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

#[cfg(unix)]
pub mod capture;
pub mod convert;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the access point and log received telemetry to CSV.
    Capture(CaptureArgs),
    /// Convert a packet sniffer capture (.psd) to CSV.
    Convert(ConvertArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        #[cfg(unix)]
        Command::Capture(args) => capture::run(args, format),
        #[cfg(not(unix))]
        Command::Capture(_) => Err(CliError::new(
            USAGE,
            "serial capture is only supported on Unix hosts",
        )),
        Command::Convert(args) => convert::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Serial device of the access point (e.g. /dev/ttyACM0).
    pub port: PathBuf,
    /// Line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// CSV log file. Default: "<YYYY MM DD HH_MM_SS> AP output.txt".
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Append the raw sensor blob as an extra column (number, hex, ascii).
    #[arg(long, value_name = "FORMAT")]
    pub blob: Option<BlobFormat>,
    /// Stop after N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Stop after this long (e.g. 30s, 500ms). Default: until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
    /// Bound on each serial read; also bounds how quickly capture stops.
    #[arg(long, default_value = "100ms")]
    pub read_timeout: String,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Sniffer capture file.
    pub input: PathBuf,
    /// CSV output. Default: the input path with a .csv extension.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
