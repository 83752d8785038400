use std::time::Duration;

use crate::error::{Result, TransportError};

/// A bidirectional byte link to the access point.
///
/// Implementations must bound every call by the supplied timeout. A read that
/// times out returns `Ok(0)`; that is not an error. Closing happens on drop.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the first one.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write some prefix of `data`, waiting at most `timeout` for the link to
    /// accept it. Returns the number of bytes written.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Discard anything pending in the receive and transmit queues.
    fn flush(&mut self) -> Result<()>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "transport"
    }

    /// Write all of `data`, retrying partial writes.
    ///
    /// A write that accepts zero bytes is fatal: the link gave nothing within a
    /// whole timeout, and retrying would spin.
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            match self.write(&data[offset..], timeout) {
                Ok(0) => {
                    return Err(TransportError::WriteZero {
                        remaining: data.len() - offset,
                    })
                }
                Ok(n) => offset += n,
                Err(TransportError::Io(err)) if err.kind() == std::io::ErrorKind::Interrupted => {
                    continue
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
