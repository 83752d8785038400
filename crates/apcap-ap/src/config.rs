use std::time::Duration;

use apcap_frame::{HEADER_LEN, MAX_FRAME_LEN};
use tracing::warn;

/// Tuning for the command channel and the capture loop.
#[derive(Debug, Clone)]
pub struct ApConfig {
    /// Command channel buffer size in bytes.
    pub command_buffer_capacity: usize,
    /// Data channel buffer size in bytes.
    pub data_buffer_capacity: usize,
    /// Largest read the capture loop issues per iteration.
    pub read_chunk: usize,
    /// Bound on each transport read. Also bounds stop latency.
    pub read_timeout: Duration,
    /// Bound on each transport write.
    pub write_timeout: Duration,
    /// Pause between sending a command and reading its acknowledgement.
    pub response_delay: Duration,
    /// Reads attempted while waiting for an acknowledgement.
    pub response_attempts: usize,
    /// Pause after an empty read while waiting for an acknowledgement.
    pub response_poll: Duration,
    /// Headers announcing longer frames are treated as corruption.
    pub max_frame_len: usize,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            command_buffer_capacity: 100,
            data_buffer_capacity: 10_000,
            read_chunk: 50,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(500),
            response_delay: Duration::from_millis(100),
            response_attempts: 10,
            response_poll: Duration::from_millis(10),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl ApConfig {
    /// Smallest data buffer that can hold one frame of `max_frame_len`.
    pub fn min_data_buffer_capacity(&self) -> usize {
        self.max_frame_len.clamp(HEADER_LEN + 1, MAX_FRAME_LEN)
    }

    /// Copy with values that would stall the capture loop raised to the
    /// smallest workable ones.
    ///
    /// A zero read chunk or a data buffer smaller than one frame makes every
    /// read request zero bytes, so the loop would spin without ever touching
    /// the transport.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();

        let max_frame_len = config.max_frame_len.clamp(HEADER_LEN + 1, MAX_FRAME_LEN);
        if max_frame_len != config.max_frame_len {
            warn!(requested = config.max_frame_len, used = max_frame_len, "max_frame_len out of range");
            config.max_frame_len = max_frame_len;
        }
        if config.read_chunk == 0 {
            warn!("read_chunk of 0 would never read, using 1");
            config.read_chunk = 1;
        }
        let min_data = config.min_data_buffer_capacity();
        if config.data_buffer_capacity < min_data {
            warn!(
                requested = config.data_buffer_capacity,
                used = min_data,
                "data buffer smaller than one frame"
            );
            config.data_buffer_capacity = min_data;
        }
        if config.command_buffer_capacity < HEADER_LEN {
            warn!(
                requested = config.command_buffer_capacity,
                used = HEADER_LEN,
                "command buffer smaller than one acknowledgement"
            );
            config.command_buffer_capacity = HEADER_LEN;
        }
        config
    }
}
