use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use apcap_frame::{fill_from, FrameScanner, RxBuffer, ScanStats};
use apcap_transport::Transport;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::ApConfig;
use crate::error::{ApError, Result};

/// Name given to the background capture thread.
pub const CAPTURE_THREAD_NAME: &str = "apcap-capture";

/// Receives every payload the capture loop extracts, in arrival order, on the
/// capture thread.
pub trait FrameSink: Send {
    fn on_frame(&mut self, payload: Bytes);
}

impl<F> FrameSink for F
where
    F: FnMut(Bytes) + Send,
{
    fn on_frame(&mut self, payload: Bytes) {
        self(payload)
    }
}

/// Counters shared between the capture thread and its controller.
#[derive(Debug, Default)]
pub struct CaptureStats {
    bytes_received: AtomicU64,
    frames_emitted: AtomicU64,
    bytes_discarded: AtomicU64,
    resyncs: AtomicU64,
    malformed: AtomicU64,
    iterations: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub bytes_received: u64,
    pub frames_emitted: u64,
    pub bytes_discarded: u64,
    pub resyncs: u64,
    pub malformed: u64,
    pub iterations: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Only meaningful while no capture is running.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_received,
            &self.frames_emitted,
            &self.bytes_discarded,
            &self.resyncs,
            &self.malformed,
            &self.iterations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_read(&self, bytes: usize) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Scanner counters are cumulative for one run; mirror them.
    fn record_scan(&self, scan: ScanStats) {
        self.frames_emitted.store(scan.frames, Ordering::Relaxed);
        self.bytes_discarded.store(scan.bytes_discarded, Ordering::Relaxed);
        self.resyncs.store(scan.resyncs, Ordering::Relaxed);
        self.malformed.store(scan.malformed, Ordering::Relaxed);
    }
}

/// What a finished capture loop hands back to its owner.
#[derive(Debug)]
pub struct CaptureExit<T> {
    pub transport: T,
    pub buffer: RxBuffer,
    /// Set when the loop stopped itself on a transport failure.
    pub error: Option<ApError>,
}

/// Data-channel pump: read, scan, emit, until told to stop.
///
/// The loop owns the transport and the data buffer for as long as it runs,
/// so nothing else can touch them concurrently. Each iteration checks the
/// stop flag first and issues at most one read bounded by `read_timeout`,
/// which bounds how long a stop request takes to be honored.
pub struct CaptureLoop<T> {
    transport: T,
    buffer: RxBuffer,
    scanner: FrameScanner,
    sink: Box<dyn FrameSink>,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    read_chunk: usize,
    read_timeout: Duration,
}

impl<T: Transport> CaptureLoop<T> {
    pub fn new<S>(transport: T, buffer: RxBuffer, sink: S, config: &ApConfig) -> Self
    where
        S: FrameSink + 'static,
    {
        let config = config.normalized();
        let buffer = if buffer.capacity() < config.min_data_buffer_capacity() {
            warn!(
                capacity = buffer.capacity(),
                "data buffer cannot hold a full frame, reallocating"
            );
            RxBuffer::new(config.data_buffer_capacity)
        } else {
            buffer
        };
        Self {
            transport,
            buffer,
            scanner: FrameScanner::with_max_frame_len(config.max_frame_len),
            sink: Box::new(sink),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::new()),
            read_chunk: config.read_chunk,
            read_timeout: config.read_timeout,
        }
    }

    /// Publish counters into an existing, shared stats block.
    pub fn with_stats(mut self, stats: Arc<CaptureStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Flag that ends the loop at the start of its next iteration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run on the current thread until the stop flag is set or the transport
    /// fails.
    pub fn run(mut self) -> CaptureExit<T> {
        info!(transport = self.transport.name(), "capture loop started");

        let error = loop {
            if self.stop.load(Ordering::Acquire) {
                break None;
            }
            if let Err(err) = self.step() {
                error!(error = %err, "capture loop failed, stopping");
                self.stop.store(true, Ordering::Release);
                break Some(err);
            }
        };

        let stats = self.stats.snapshot();
        info!(
            frames = stats.frames_emitted,
            bytes = stats.bytes_received,
            discarded = stats.bytes_discarded,
            "capture loop exited"
        );
        if self.scanner.pending() > 0 {
            debug!(pending = self.scanner.pending(), "dropping partially received frame");
        }

        CaptureExit {
            transport: self.transport,
            buffer: self.buffer,
            error,
        }
    }

    /// Move the loop onto a dedicated thread.
    pub fn spawn(self) -> Result<CaptureHandle<T>>
    where
        T: 'static,
    {
        let stop = self.stop_flag();
        let thread = std::thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|err| ApError::CaptureThread(err.to_string()))?;
        Ok(CaptureHandle { stop, thread })
    }

    fn step(&mut self) -> Result<()> {
        let read = fill_from(
            &mut self.buffer,
            &mut self.transport,
            self.read_chunk,
            self.read_timeout,
        )?;
        self.stats.record_read(read);

        let sink = &mut self.sink;
        self.scanner.scan(&mut self.buffer, |payload| {
            trace!(len = payload.len(), "frame received");
            sink.on_frame(payload);
        });
        self.stats.record_scan(self.scanner.stats());
        Ok(())
    }
}

/// Handle to a capture loop running on its own thread.
#[derive(Debug)]
pub struct CaptureHandle<T> {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<CaptureExit<T>>,
}

impl<T> CaptureHandle<T> {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the thread has returned, whether asked to or not.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread and take back what it owned.
    ///
    /// A panic inside the sink loses the transport and surfaces as
    /// [`ApError::CaptureThread`].
    pub fn join(self) -> Result<CaptureExit<T>> {
        self.thread.join().map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "capture thread panicked".to_string());
            ApError::CaptureThread(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use apcap_frame::MAX_FRAME_LEN;
    use apcap_transport::mock::MockTransport;
    use apcap_transport::TransportError;

    use super::*;

    fn fast_config() -> ApConfig {
        ApConfig {
            read_timeout: Duration::from_millis(5),
            ..ApConfig::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn closure_is_a_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |payload: Bytes| seen.push(payload);
            sink.on_frame(Bytes::from_static(b"ab"));
        }
        assert_eq!(seen, vec![Bytes::from_static(b"ab")]);
    }

    #[test]
    fn emits_frames_in_order_and_counts() {
        let mock = MockTransport::new();
        mock.push_read(vec![0x00, 0xFF, 0x06, 0x05, 0x01]);
        mock.push_read(vec![0x02, 0xFF, 0x06, 0x04, 0x03]);
        let (tx, rx) = mpsc::channel();

        let capture = CaptureLoop::new(
            mock.clone(),
            RxBuffer::new(64),
            move |payload: Bytes| {
                let _ = tx.send(payload);
            },
            &fast_config(),
        );
        let stats = capture.stats();
        let handle = capture.spawn().unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(), &[1, 2]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(), &[3]);

        handle.request_stop();
        let exit = handle.join().unwrap();
        assert!(exit.error.is_none());
        assert!(exit.buffer.is_empty());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_received, 10);
        assert_eq!(snapshot.frames_emitted, 2);
        assert_eq!(snapshot.bytes_discarded, 1);
        assert_eq!(snapshot.resyncs, 1);
    }

    #[test]
    fn stops_promptly_on_idle_link() {
        let mock = MockTransport::new();
        let capture = CaptureLoop::new(mock.clone(), RxBuffer::new(64), |_: Bytes| {}, &fast_config());
        let handle = capture.spawn().unwrap();

        wait_for(|| mock.read_calls() > 3);
        let started = Instant::now();
        handle.request_stop();
        let exit = handle.join().unwrap();

        assert!(exit.error.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn transport_failure_ends_loop_with_error() {
        let mock = MockTransport::new();
        mock.fail_reads(std::io::ErrorKind::BrokenPipe);
        let capture = CaptureLoop::new(mock.clone(), RxBuffer::new(64), |_: Bytes| {}, &fast_config());
        let stop = capture.stop_flag();
        let handle = capture.spawn().unwrap();

        wait_for(|| handle.is_finished());
        assert!(stop.load(Ordering::Acquire), "loop raises its own stop flag");

        let exit = handle.join().unwrap();
        assert!(matches!(
            exit.error,
            Some(ApError::Transport(TransportError::Io(_)))
        ));
    }

    #[test]
    fn undersized_settings_still_read_frames() {
        let mock = MockTransport::new();
        mock.push_read(vec![0xFF, 0x06, 0x04, 0x01]);
        let config = ApConfig {
            read_chunk: 0,
            ..fast_config()
        };
        let (tx, rx) = mpsc::channel();
        let capture = CaptureLoop::new(
            mock.clone(),
            RxBuffer::new(2),
            move |payload: Bytes| {
                let _ = tx.send(payload);
            },
            &config,
        );
        let handle = capture.spawn().unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(), &[1]);
        assert!(mock.read_calls() > 0);

        handle.request_stop();
        let exit = handle.join().unwrap();
        assert!(exit.buffer.capacity() >= MAX_FRAME_LEN);
    }

    #[test]
    fn preset_stop_flag_skips_reads() {
        let mock = MockTransport::new();
        let capture = CaptureLoop::new(mock.clone(), RxBuffer::new(64), |_: Bytes| {}, &fast_config());
        capture.stop_flag().store(true, Ordering::Release);

        let exit = capture.run();
        assert!(exit.error.is_none());
        assert_eq!(mock.read_calls(), 0);
    }

    #[test]
    fn sink_panic_is_reported() {
        let mock = MockTransport::new();
        mock.push_read(vec![0xFF, 0x06, 0x04, 0x01]);
        let capture = CaptureLoop::new(
            mock,
            RxBuffer::new(64),
            |_: Bytes| panic!("sink exploded"),
            &fast_config(),
        );
        let handle = capture.spawn().unwrap();

        let err = handle.join().unwrap_err();
        assert!(matches!(err, ApError::CaptureThread(ref msg) if msg.contains("sink exploded")));
    }

    #[test]
    fn reset_zeroes_counters() {
        let stats = CaptureStats::new();
        stats.record_read(12);
        stats.record_scan(ScanStats {
            frames: 2,
            bytes_discarded: 1,
            resyncs: 1,
            malformed: 0,
        });
        assert_eq!(stats.snapshot().frames_emitted, 2);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
