use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use apcap_ap::{AccessPoint, ApConfig};
use apcap_decode::{csv_header, BlobFormat, LinkTable, TelemetryRecord};
use apcap_transport::SerialConfig;
use bytes::Bytes;
use chrono::{DateTime, Local, NaiveTime};
use tracing::{info, warn};

use crate::cmd::{parse_duration, CaptureArgs};
use crate::exit::{ap_error, io_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_capture_report, print_record, OutputFormat};

// How often the main thread re-checks Ctrl-C, limits and capture health.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let read_timeout = parse_duration(&args.read_timeout)?;
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let config = ApConfig {
        read_timeout,
        ..ApConfig::default()
    };
    let serial = SerialConfig {
        baud_rate: args.baud,
        ..SerialConfig::default()
    };
    let mut ap = AccessPoint::open(&args.port, &serial, config)
        .map_err(|err| ap_error(&format!("failed opening {}", args.port.display()), err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let log_path = args.output.clone().unwrap_or_else(default_log_name);
    let file = File::create(&log_path)
        .map_err(|err| io_error(&format!("failed creating {}", log_path.display()), err))?;
    let mut session = Session {
        log: CaptureLog::new(BufWriter::new(file), args.blob),
        links: LinkTable::new(),
        frames: 0,
        decode_failures: 0,
        format,
    };

    let (tx, rx) = mpsc::channel::<Bytes>();
    ap.start(move |payload: Bytes| {
        let _ = tx.send(payload);
    })
    .map_err(|err| ap_error("access point start failed", err))?;
    session
        .log
        .write_preamble(Local::now())
        .map_err(|err| io_error("failed writing capture log", err))?;
    info!(
        port = %args.port.display(),
        log = %log_path.display(),
        "capture running, press Ctrl-C to stop"
    );

    let deadline = limit.map(|limit| Instant::now() + limit);
    let mut progress = Progress::new(PROGRESS_INTERVAL, Instant::now());
    let outcome = loop {
        let stats = ap.stats();
        if progress.due(Instant::now(), stats.frames_emitted) {
            info!(
                packets = stats.frames_emitted,
                bytes = stats.bytes_received,
                "packets received"
            );
        }
        if !running.load(Ordering::SeqCst) {
            info!("interrupted");
            break Ok(());
        }
        if session.reached(args.count) {
            break Ok(());
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("capture duration elapsed");
            break Ok(());
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(payload) => {
                if let Err(err) = session.handle(&payload) {
                    break Err(err);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !ap.is_capture_alive() {
                    warn!("capture thread ended on its own");
                    break Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    let report = ap
        .stop()
        .map_err(|err| ap_error("access point stop failed", err))?
        .ok_or_else(|| CliError::new(INTERNAL, "capture was not running at stop"))?;
    outcome?;

    // Frames scanned before the loop joined are still queued.
    for payload in rx.try_iter() {
        if session.reached(args.count) {
            break;
        }
        session.handle(&payload)?;
    }
    session
        .log
        .flush()
        .map_err(|err| io_error("failed writing capture log", err))?;

    print_capture_report(&report, &log_path, session.decode_failures, format);

    if let Some(loop_error) = report.loop_error {
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("capture stopped early: {loop_error}"),
        ));
    }
    Ok(SUCCESS)
}

struct Session<W: Write> {
    log: CaptureLog<W>,
    links: LinkTable,
    frames: u64,
    decode_failures: u64,
    format: OutputFormat,
}

impl<W: Write> Session<W> {
    fn reached(&self, count: Option<u64>) -> bool {
        count.is_some_and(|count| self.frames >= count)
    }

    fn handle(&mut self, payload: &[u8]) -> CliResult<()> {
        self.frames += 1;

        match TelemetryRecord::decode(payload) {
            Ok(record) => {
                self.log
                    .write_record(&record, Local::now().time())
                    .map_err(|err| io_error("failed writing capture log", err))?;
                self.links.update(&record);
                print_record(&record, payload, &self.links, self.format);
            }
            Err(err) => {
                self.decode_failures += 1;
                warn!(error = %err, len = payload.len(), "skipping undecodable frame");
            }
        }
        Ok(())
    }
}

/// Rate limit for the "packets received" line: at most once per interval,
/// and only when new frames arrived.
struct Progress {
    every: Duration,
    last_at: Instant,
    last_frames: u64,
}

impl Progress {
    fn new(every: Duration, now: Instant) -> Self {
        Self {
            every,
            last_at: now,
            last_frames: 0,
        }
    }

    fn due(&mut self, now: Instant, frames: u64) -> bool {
        if now.duration_since(self.last_at) < self.every || frames == self.last_frames {
            return false;
        }
        self.last_at = now;
        self.last_frames = frames;
        true
    }
}

/// Capture log: a start line, the column header, then one row per record.
struct CaptureLog<W: Write> {
    out: W,
    blob: Option<BlobFormat>,
}

impl<W: Write> CaptureLog<W> {
    fn new(out: W, blob: Option<BlobFormat>) -> Self {
        Self { out, blob }
    }

    fn write_preamble(&mut self, started: DateTime<Local>) -> io::Result<()> {
        writeln!(self.out, "Start @ {}", started.format("%c"))?;
        writeln!(self.out, "{}", csv_header(self.blob.is_some()))?;
        self.out.flush()
    }

    // Flushed per row so the log can be followed while capturing.
    fn write_record(&mut self, record: &TelemetryRecord, received_at: NaiveTime) -> io::Result<()> {
        writeln!(self.out, "{}", record.csv_row(received_at, self.blob))?;
        self.out.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn default_log_name() -> PathBuf {
    PathBuf::from(format!(
        "{} AP output.txt",
        Local::now().format("%Y %m %d %H_%M_%S")
    ))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
