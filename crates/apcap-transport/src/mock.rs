//! Scripted in-memory transport.
//!
//! `MockTransport` is a cheap clonable handle: hand one clone to the code under
//! test (possibly moving it to another thread) and keep another to script input
//! and inspect what was written.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// How long an empty read sleeps at most, standing in for a device read timeout.
const IDLE_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct MockState {
    reads: VecDeque<Vec<u8>>,
    replies: Vec<(Vec<u8>, Vec<u8>)>,
    written: Vec<u8>,
    write_limit: Option<usize>,
    fail_reads: Option<std::io::ErrorKind>,
    fail_writes: Option<std::io::ErrorKind>,
    flushes: usize,
    read_calls: usize,
}

/// Clonable scripted transport. All clones share one state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create an empty transport: every read returns zero bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk to be returned by a future read. An empty chunk produces
    /// one zero-byte read.
    pub fn push_read(&self, chunk: impl Into<Vec<u8>>) {
        self.lock().reads.push_back(chunk.into());
    }

    /// Whenever the written stream ends with `request`, queue `reply` for reading.
    pub fn reply_to(&self, request: impl Into<Vec<u8>>, reply: impl Into<Vec<u8>>) {
        self.lock().replies.push((request.into(), reply.into()));
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&self, limit: usize) {
        self.lock().write_limit = Some(limit);
    }

    /// Make every subsequent read fail with `kind`.
    pub fn fail_reads(&self, kind: std::io::ErrorKind) {
        self.lock().fail_reads = Some(kind);
    }

    /// Make every subsequent write fail with `kind`.
    pub fn fail_writes(&self, kind: std::io::ErrorKind) {
        self.lock().fail_writes = Some(kind);
    }

    /// Undo [`fail_reads`](Self::fail_reads) and [`fail_writes`](Self::fail_writes).
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_reads = None;
        state.fail_writes = None;
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Number of `flush` calls.
    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    /// Number of `read` calls, including zero-byte ones.
    pub fn read_calls(&self) -> usize {
        self.lock().read_calls
    }

    /// Chunks still waiting to be read.
    pub fn pending_reads(&self) -> usize {
        self.lock().reads.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let idle = {
            let mut state = self.lock();
            state.read_calls += 1;
            if let Some(kind) = state.fail_reads {
                return Err(std::io::Error::from(kind).into());
            }
            match state.reads.pop_front() {
                Some(mut chunk) if !chunk.is_empty() => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        state.reads.push_front(chunk.split_off(n));
                    }
                    return Ok(n);
                }
                Some(_) => return Ok(0),
                None => IDLE_DELAY,
            }
        };

        std::thread::sleep(idle.min(timeout));
        Ok(0)
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize> {
        let mut state = self.lock();
        if let Some(kind) = state.fail_writes {
            return Err(std::io::Error::from(kind).into());
        }
        let n = state.write_limit.map_or(data.len(), |limit| data.len().min(limit));
        state.written.extend_from_slice(&data[..n]);

        let replies: Vec<Vec<u8>> = state
            .replies
            .iter()
            .filter(|(request, _)| state.written.ends_with(request))
            .map(|(_, reply)| reply.clone())
            .collect();
        state.reads.extend(replies);
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes.is_some() {
            return Err(TransportError::Closed);
        }
        state.flushes += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
