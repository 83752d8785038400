use std::fmt;
use std::sync::Arc;

use apcap_frame::RxBuffer;
use apcap_transport::Transport;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{CaptureExit, CaptureHandle, CaptureLoop, CaptureStats, FrameSink, StatsSnapshot};
use crate::command::{CommandChannel, ControlCommand};
use crate::config::ApConfig;
use crate::error::{ApError, Result};

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Stopped => "stopped",
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Summary of a finished capture run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub stats: StatsSnapshot,
    /// Whether the access point acknowledged the stop command.
    pub stop_acknowledged: bool,
    /// Transport failure that ended the run early, if any.
    pub loop_error: Option<String>,
}

/// Controls one access point: start/stop handshakes plus the capture thread.
///
/// The transport lives either here or inside the running capture loop, never
/// in both places.
pub struct AccessPoint<T: Transport + 'static> {
    config: ApConfig,
    state: CaptureState,
    transport: Option<T>,
    command: CommandChannel,
    data_buffer: Option<RxBuffer>,
    capture: Option<CaptureHandle<T>>,
    stats: Arc<CaptureStats>,
}

impl<T: Transport + 'static> AccessPoint<T> {
    /// Wrap `transport`. Config values that would stall capture are raised
    /// to workable minimums (see [`ApConfig::normalized`]).
    pub fn new(transport: T, config: ApConfig) -> Self {
        let config = config.normalized();
        Self {
            command: CommandChannel::new(&config),
            data_buffer: Some(RxBuffer::new(config.data_buffer_capacity)),
            state: CaptureState::Stopped,
            transport: Some(transport),
            capture: None,
            stats: Arc::new(CaptureStats::new()),
            config,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn config(&self) -> &ApConfig {
        &self.config
    }

    /// Counters for the current (or last) run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the capture thread is still pumping data. A run can end on its
    /// own after a transport failure while the state still reads `Running`.
    pub fn is_capture_alive(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Send the start command and, once acknowledged, start capturing into
    /// `sink`.
    pub fn start<S>(&mut self, sink: S) -> Result<()>
    where
        S: FrameSink + 'static,
    {
        if self.state != CaptureState::Stopped {
            return Err(ApError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let mut transport = self.transport.take().ok_or(ApError::TransportUnavailable)?;

        self.state = CaptureState::Starting;
        if let Err(err) = self.handshake(&mut transport, ControlCommand::Start) {
            self.transport = Some(transport);
            self.state = CaptureState::Stopped;
            return Err(err);
        }

        let mut buffer = self
            .data_buffer
            .take()
            .unwrap_or_else(|| RxBuffer::new(self.config.data_buffer_capacity));
        buffer.clear();
        self.stats.reset();

        let capture = CaptureLoop::new(transport, buffer, sink, &self.config)
            .with_stats(Arc::clone(&self.stats));
        match capture.spawn() {
            Ok(handle) => {
                self.capture = Some(handle);
                self.state = CaptureState::Running;
                info!("capture started");
                Ok(())
            }
            Err(err) => {
                self.state = CaptureState::Stopped;
                Err(err)
            }
        }
    }

    /// Stop capturing and send the stop command.
    ///
    /// Returns `Ok(None)` when nothing was running. A missing or wrong stop
    /// acknowledgement is reported in the returned [`CaptureReport`]. A
    /// transport failure while sending it is returned as an error, unless the
    /// capture loop had already failed, in which case the report carries the
    /// loop's error. Either way the controller ends up `Stopped`.
    pub fn stop(&mut self) -> Result<Option<CaptureReport>> {
        let Some(handle) = self.capture.take() else {
            debug!(state = %self.state, "stop requested with no capture running");
            return Ok(None);
        };

        self.state = CaptureState::Stopping;
        handle.request_stop();
        let CaptureExit {
            mut transport,
            buffer,
            error,
        } = match handle.join() {
            Ok(exit) => exit,
            Err(err) => {
                self.state = CaptureState::Stopped;
                return Err(err);
            }
        };
        self.data_buffer = Some(buffer);
        let loop_error = error.map(|err| err.to_string());

        let ack = self.handshake(&mut transport, ControlCommand::Stop);
        self.transport = Some(transport);
        self.state = CaptureState::Stopped;

        let stop_acknowledged = match ack {
            Ok(()) => true,
            Err(ApError::ProtocolMismatch { expected, actual }) => {
                warn!(?expected, ?actual, "stop command not acknowledged");
                false
            }
            // The link already failed under the capture loop; that failure is
            // the one worth reporting.
            Err(err) if loop_error.is_some() => {
                warn!(error = %err, "stop command not delivered after capture failure");
                false
            }
            Err(err) => return Err(err),
        };

        let stats = self.stats.snapshot();
        info!(
            frames = stats.frames_emitted,
            bytes = stats.bytes_received,
            "capture stopped"
        );
        Ok(Some(CaptureReport {
            stats,
            stop_acknowledged,
            loop_error,
        }))
    }

    /// Release the transport. Stops a running capture first.
    pub fn into_transport(mut self) -> Result<T> {
        self.stop()?;
        self.transport.take().ok_or(ApError::TransportUnavailable)
    }

    fn handshake(&mut self, transport: &mut T, command: ControlCommand) -> Result<()> {
        transport.flush()?;
        self.command.exchange(transport, command)?;
        debug!(%command, "command acknowledged");
        Ok(())
    }
}

#[cfg(unix)]
impl AccessPoint<apcap_transport::SerialPort> {
    /// Open the serial device at `path` and wrap it in a controller.
    pub fn open(
        path: impl AsRef<std::path::Path>,
        serial: &apcap_transport::SerialConfig,
        config: ApConfig,
    ) -> Result<Self> {
        let port = apcap_transport::SerialPort::open(path, serial)?;
        Ok(Self::new(port, config))
    }
}

impl<T: Transport + 'static> Drop for AccessPoint<T> {
    fn drop(&mut self) {
        if self.capture.is_some() {
            if let Err(err) = self.stop() {
                warn!(error = %err, "failed to stop capture on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use apcap_transport::mock::MockTransport;
    use bytes::Bytes;

    use super::*;

    const START_REQ: [u8; 3] = [0xFF, 0x07, 0x03];
    const STOP_REQ: [u8; 3] = [0xFF, 0x09, 0x03];
    const ACK: [u8; 3] = [0xFF, 0x06, 0x03];

    fn fast_config() -> ApConfig {
        ApConfig {
            read_timeout: Duration::from_millis(5),
            response_delay: Duration::ZERO,
            response_attempts: 5,
            response_poll: Duration::from_millis(1),
            ..ApConfig::default()
        }
    }

    fn acking_mock() -> MockTransport {
        let mock = MockTransport::new();
        mock.reply_to(START_REQ, ACK);
        mock.reply_to(STOP_REQ, ACK);
        mock
    }

    #[test]
    fn start_and_stop_with_acks() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        assert_eq!(ap.state(), CaptureState::Stopped);

        ap.start(|_: Bytes| {}).unwrap();
        assert_eq!(ap.state(), CaptureState::Running);
        assert!(ap.is_capture_alive());

        let report = ap.stop().unwrap().unwrap();
        assert_eq!(ap.state(), CaptureState::Stopped);
        assert!(report.stop_acknowledged);
        assert!(report.loop_error.is_none());
        assert!(!ap.is_capture_alive());

        let mut expected = START_REQ.to_vec();
        expected.extend_from_slice(&STOP_REQ);
        assert_eq!(mock.written(), expected);
        assert_eq!(mock.flushes(), 2);
    }

    #[test]
    fn bad_start_ack_returns_to_stopped() {
        let mock = MockTransport::new();
        mock.reply_to(START_REQ, [0xFF, 0x05, 0x03]);
        let mut ap = AccessPoint::new(mock, fast_config());

        let err = ap.start(|_: Bytes| {}).unwrap_err();
        assert!(matches!(err, ApError::ProtocolMismatch { .. }));
        assert_eq!(ap.state(), CaptureState::Stopped);
        assert!(!ap.is_capture_alive());

        // The transport is still ours; another attempt reaches the device.
        let err = ap.start(|_: Bytes| {}).unwrap_err();
        assert!(matches!(err, ApError::ProtocolMismatch { .. }));
    }

    #[test]
    fn frames_reach_sink_in_order() {
        let mock = acking_mock();
        let (tx, rx) = mpsc::channel();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        ap.start(move |payload: Bytes| {
            let _ = tx.send(payload);
        })
        .unwrap();

        mock.push_read(vec![0xFF, 0x06, 0x05, 0x10, 0x11, 0xFF]);
        mock.push_read(vec![0x06, 0x04, 0x20]);

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.as_ref(), &[0x10, 0x11]);
        assert_eq!(second.as_ref(), &[0x20]);

        let report = ap.stop().unwrap().unwrap();
        assert_eq!(report.stats.frames_emitted, 2);
        assert_eq!(report.stats.bytes_received, 9);
    }

    #[test]
    fn stop_is_bounded_on_idle_link() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while mock.read_calls() < 5 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        ap.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn missing_stop_ack_is_tolerated() {
        let mock = MockTransport::new();
        mock.reply_to(START_REQ, ACK);
        let mut ap = AccessPoint::new(mock, fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        let report = ap.stop().unwrap().unwrap();
        assert!(!report.stop_acknowledged);
        assert_eq!(ap.state(), CaptureState::Stopped);
    }

    #[test]
    fn loop_failure_is_reported_on_stop() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        mock.fail_reads(std::io::ErrorKind::BrokenPipe);
        let deadline = Instant::now() + Duration::from_secs(5);
        while ap.is_capture_alive() {
            assert!(Instant::now() < deadline, "capture should stop on its own");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ap.state(), CaptureState::Running);

        mock.clear_failures();
        let report = ap.stop().unwrap().unwrap();
        assert!(report.loop_error.is_some());
        assert!(report.stop_acknowledged);
    }

    #[test]
    fn dead_link_still_yields_report() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        mock.push_read(vec![0xFF, 0x06, 0x04, 0x01]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while ap.stats().frames_emitted < 1 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }

        // Device unplugged: everything fails from here on.
        mock.fail_reads(std::io::ErrorKind::BrokenPipe);
        mock.fail_writes(std::io::ErrorKind::BrokenPipe);
        while ap.is_capture_alive() {
            assert!(Instant::now() < deadline, "capture should stop on its own");
            std::thread::sleep(Duration::from_millis(1));
        }

        let report = ap.stop().unwrap().unwrap();
        assert_eq!(ap.state(), CaptureState::Stopped);
        assert!(!report.stop_acknowledged);
        assert_eq!(report.stats.frames_emitted, 1);
        assert!(report.loop_error.is_some());
    }

    #[test]
    fn tiny_config_does_not_stall_capture() {
        let mock = acking_mock();
        let config = ApConfig {
            read_chunk: 0,
            data_buffer_capacity: 2,
            ..fast_config()
        };
        let mut ap = AccessPoint::new(mock.clone(), config);
        assert_eq!(ap.config().read_chunk, 1);
        assert!(ap.config().data_buffer_capacity >= apcap_frame::MAX_FRAME_LEN);

        let (tx, rx) = mpsc::channel();
        ap.start(move |payload: Bytes| {
            let _ = tx.send(payload);
        })
        .unwrap();
        mock.push_read(vec![0xFF, 0x06, 0x04, 0x01]);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().as_ref(), &[0x01]);
        let report = ap.stop().unwrap().unwrap();
        assert_eq!(report.stats.frames_emitted, 1);
    }

    #[test]
    fn stop_write_failure_is_an_error_but_stops() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        mock.fail_writes(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(ap.stop(), Err(ApError::Transport(_))));
        assert_eq!(ap.state(), CaptureState::Stopped);
    }

    #[test]
    fn double_start_is_invalid() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock, fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        let err = ap.start(|_: Bytes| {}).unwrap_err();
        assert!(matches!(
            err,
            ApError::InvalidState {
                operation: "start",
                state: CaptureState::Running
            }
        ));
        ap.stop().unwrap();
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mock = MockTransport::new();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());
        assert!(ap.stop().unwrap().is_none());
        assert!(mock.written().is_empty());
    }

    #[test]
    fn restart_resets_stats() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock.clone(), fast_config());

        ap.start(|_: Bytes| {}).unwrap();
        mock.push_read(vec![0xFF, 0x06, 0x04, 0x01]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while ap.stats().frames_emitted < 1 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        ap.stop().unwrap();

        ap.start(|_: Bytes| {}).unwrap();
        assert_eq!(ap.stats().frames_emitted, 0);
        ap.stop().unwrap();
    }

    #[test]
    fn drop_stops_running_capture() {
        let mock = acking_mock();
        {
            let mut ap = AccessPoint::new(mock.clone(), fast_config());
            ap.start(|_: Bytes| {}).unwrap();
        }
        assert!(mock.written().ends_with(&STOP_REQ));
    }

    #[test]
    fn into_transport_returns_link() {
        let mock = acking_mock();
        let mut ap = AccessPoint::new(mock, fast_config());
        ap.start(|_: Bytes| {}).unwrap();

        let link = ap.into_transport().unwrap();
        assert!(link.written().ends_with(&STOP_REQ));
    }
}
