use bytes::Bytes;
use tracing::debug;

use crate::buffer::RxBuffer;
use crate::codec::{FrameHeader, HEADER_LEN, MARKER, MAX_FRAME_LEN, START_SEQUENCE};

/// Diagnostic counters kept by a [`FrameScanner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Frames emitted.
    pub frames: u64,
    /// Bytes thrown away while looking for a frame start.
    pub bytes_discarded: u64,
    /// Times bytes had to be discarded to find (or keep looking for) a header.
    pub resyncs: u64,
    /// Headers rejected for an impossible length (below the header size,
    /// zero payload, or larger than allowed).
    pub malformed: u64,
}

/// Locates frame boundaries in a [`RxBuffer`] and emits payloads.
///
/// The only framing state is the pending payload length: zero while hunting
/// for a header, otherwise the number of payload bytes the current frame still
/// needs. No checksum is verified here; integrity flags inside payloads are
/// the decoder's concern.
///
/// Resynchronization favours forward progress over salvage: bytes that cannot
/// start a frame are discarded. A trailing partial start sequence is kept, so
/// the frames found do not depend on how the input was split across reads.
#[derive(Debug)]
pub struct FrameScanner {
    pending: usize,
    max_frame_len: usize,
    stats: ScanStats,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    /// Scanner accepting any length a header can express.
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    /// Scanner that treats headers announcing more than `max_frame_len` total
    /// bytes as corruption.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            pending: 0,
            max_frame_len,
            stats: ScanStats::default(),
        }
    }

    /// Payload bytes still expected for the current frame (0 = hunting).
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Forget any partially recognized frame.
    pub fn reset(&mut self) {
        self.pending = 0;
    }

    /// Counters accumulated since creation.
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Extract every complete frame currently in `buf`, calling `emit` with
    /// each payload in order. Returns the number of frames emitted.
    pub fn scan<F>(&mut self, buf: &mut RxBuffer, mut emit: F) -> usize
    where
        F: FnMut(Bytes),
    {
        let mut emitted = 0usize;
        loop {
            if self.pending == 0 {
                if buf.len() < HEADER_LEN || !self.locate_header(buf) {
                    return emitted;
                }
                // A malformed header leaves pending at zero; hunt again.
                continue;
            }

            if buf.len() < self.pending {
                return emitted;
            }

            let payload = buf.split_front(self.pending);
            self.pending = 0;
            self.stats.frames += 1;
            emitted += 1;
            emit(payload);
        }
    }

    /// Consume bytes up to and including the next header.
    ///
    /// Returns `false` when no complete header is buffered yet; scanning should
    /// wait for more input.
    fn locate_header(&mut self, buf: &mut RxBuffer) -> bool {
        let data = buf.as_slice();
        let found = find_start(data);

        let (start, header) = match found.and_then(|start| {
            FrameHeader::parse(&data[start..]).map(|header| (start, header))
        }) {
            Some(found) => found,
            None => {
                // Keep a start sequence cut off at the end of the buffer.
                let keep = match found {
                    Some(start) => data.len() - start,
                    None => usize::from(data.last() == Some(&MARKER)),
                };
                let discard = data.len() - keep;
                if discard > 0 {
                    debug!(discarded = discard, "packet start not found, discarding bytes");
                    self.stats.bytes_discarded += discard as u64;
                    self.stats.resyncs += 1;
                    buf.consume_front(discard);
                }
                return false;
            }
        };

        let total_len = header.total_len as usize;
        let capacity = buf.capacity();

        if start > 0 {
            debug!(discarded = start, "packet header found after discarding bytes");
            self.stats.bytes_discarded += start as u64;
            self.stats.resyncs += 1;
        }

        if total_len > self.max_frame_len || total_len.saturating_sub(HEADER_LEN) > capacity {
            debug!(total_len, max = self.max_frame_len, "oversized frame header, resynchronizing");
            self.stats.malformed += 1;
            self.stats.bytes_discarded += 1;
            buf.consume_front(start + 1);
            return true;
        }

        buf.consume_front(start + HEADER_LEN);
        match header.payload_len() {
            Some(payload_len) if payload_len > 0 => self.pending = payload_len,
            _ => {
                debug!(total_len, "frame header without payload, ignoring");
                self.stats.malformed += 1;
            }
        }
        true
    }
}

fn find_start(data: &[u8]) -> Option<usize> {
    data.windows(START_SEQUENCE.len())
        .position(|window| window == START_SEQUENCE)
}
