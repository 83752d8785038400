use std::fmt;
use std::time::Duration;

use apcap_frame::{fill_from, write_frame, FrameHeader, RxBuffer, ACK, HEADER_LEN, START, STOP};
use apcap_transport::Transport;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::ApConfig;
use crate::error::{ApError, Result};

/// Control requests understood by the access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    /// Start the radio: `[FF 07 03]`.
    Start,
    /// Stop the radio: `[FF 09 03]`.
    Stop,
}

impl ControlCommand {
    /// Type byte of the request frame.
    pub fn frame_type(self) -> u8 {
        match self {
            ControlCommand::Start => START,
            ControlCommand::Stop => STOP,
        }
    }

    /// Request bytes written to the access point: a header-only frame.
    pub fn request(self) -> [u8; HEADER_LEN] {
        FrameHeader::empty(self.frame_type()).to_bytes()
    }

    /// Acknowledgement the access point sends back: the request with the
    /// type byte replaced by the no-error code.
    pub fn expected_response(self) -> [u8; HEADER_LEN] {
        FrameHeader::empty(ACK).to_bytes()
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Start => f.write_str("START"),
            ControlCommand::Stop => f.write_str("STOP"),
        }
    }
}

/// Synchronous request/acknowledgement exchange with its own receive buffer.
///
/// Only used while the capture loop is not running, so it can borrow the
/// transport for the duration of one call.
#[derive(Debug)]
pub struct CommandChannel {
    buffer: RxBuffer,
    read_timeout: Duration,
    write_timeout: Duration,
    response_delay: Duration,
    response_attempts: usize,
    response_poll: Duration,
}

impl CommandChannel {
    pub fn new(config: &ApConfig) -> Self {
        Self {
            buffer: RxBuffer::new(config.command_buffer_capacity),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            response_delay: config.response_delay,
            response_attempts: config.response_attempts,
            response_poll: config.response_poll,
        }
    }

    /// Write the whole command frame, completing partial writes.
    pub fn send<T>(&mut self, transport: &mut T, command: ControlCommand) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        trace!(%command, "sending command");
        write_frame(transport, command.frame_type(), &[], self.write_timeout)?;
        Ok(())
    }

    /// Read until `expected.len()` bytes are buffered, then compare them.
    ///
    /// At most `response_attempts` reads are issued, with a short pause after
    /// each empty one. A short or different response is reported as
    /// [`ApError::ProtocolMismatch`] and not retried. Matched bytes are
    /// consumed from the buffer.
    pub fn await_response<T>(&mut self, transport: &mut T, expected: &[u8]) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        let mut attempts = 0usize;
        while self.buffer.len() < expected.len() && attempts < self.response_attempts {
            attempts += 1;
            let missing = expected.len() - self.buffer.len();
            let read = fill_from(&mut self.buffer, transport, missing, self.read_timeout)?;
            if read == 0 {
                if self.buffer.is_full() {
                    break;
                }
                std::thread::sleep(self.response_poll);
            }
        }

        let received = &self.buffer.as_slice()[..self.buffer.len().min(expected.len())];
        if received != expected {
            return Err(ApError::ProtocolMismatch {
                expected: expected.to_vec(),
                actual: received.to_vec(),
            });
        }

        debug!(attempts, "response matched");
        self.buffer.consume_front(expected.len());
        Ok(())
    }

    /// Clear the buffer, send `command` and check its acknowledgement.
    pub fn exchange<T>(&mut self, transport: &mut T, command: ControlCommand) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        self.clear();
        self.send(transport, command)?;
        if !self.response_delay.is_zero() {
            std::thread::sleep(self.response_delay);
        }
        self.await_response(transport, &command.expected_response())
    }

    /// Drop anything left over from a previous exchange.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes received on the command channel and not yet matched.
    pub fn buffered(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}
