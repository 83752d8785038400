use std::time::Duration;

use apcap_transport::Transport;

use crate::buffer::RxBuffer;
use crate::error::Result;

/// Largest single read issued by [`fill_from`].
pub const READ_CHUNK_LIMIT: usize = 256;

/// Perform one bounded transport read into `buf`.
///
/// At most `min(max_bytes, buf.remaining())` bytes are requested, so a full
/// buffer leaves input queued in the transport rather than losing it. Returns
/// the number of bytes appended; zero is normal for an idle link.
pub fn fill_from<T>(
    buf: &mut RxBuffer,
    transport: &mut T,
    max_bytes: usize,
    timeout: Duration,
) -> Result<usize>
where
    T: Transport + ?Sized,
{
    let want = max_bytes.min(buf.remaining()).min(READ_CHUNK_LIMIT);
    if want == 0 {
        return Ok(0);
    }

    let mut chunk = [0u8; READ_CHUNK_LIMIT];
    let read = transport.read(&mut chunk[..want], timeout)?;
    let accepted = buf.append(&chunk[..read]);
    debug_assert_eq!(accepted, read, "transport returned more than requested");
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use apcap_transport::mock::MockTransport;
    use apcap_transport::TransportError;

    use super::*;
    use crate::error::FrameError;

    const T: Duration = Duration::from_millis(5);

    #[test]
    fn reads_at_most_max_bytes() {
        let mock = MockTransport::new();
        mock.push_read(vec![1, 2, 3, 4, 5, 6]);
        let mut link = mock.clone();
        let mut buf = RxBuffer::new(64);

        assert_eq!(fill_from(&mut buf, &mut link, 4, T).unwrap(), 4);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(fill_from(&mut buf, &mut link, 4, T).unwrap(), 2);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn full_buffer_leaves_bytes_in_transport() {
        let mock = MockTransport::new();
        mock.push_read(vec![9; 10]);
        let mut link = mock.clone();
        let mut buf = RxBuffer::new(4);

        assert_eq!(fill_from(&mut buf, &mut link, 50, T).unwrap(), 4);
        assert!(buf.is_full());
        assert_eq!(fill_from(&mut buf, &mut link, 50, T).unwrap(), 0);
        assert_eq!(mock.read_calls(), 1, "no read is issued without room");

        buf.consume_front(4);
        assert_eq!(fill_from(&mut buf, &mut link, 50, T).unwrap(), 4);
        assert_eq!(mock.pending_reads(), 1);
    }

    #[test]
    fn idle_link_reads_zero() {
        let mock = MockTransport::new();
        let mut link = mock.clone();
        let mut buf = RxBuffer::new(8);
        assert_eq!(fill_from(&mut buf, &mut link, 8, T).unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn transport_failure_propagates() {
        let mock = MockTransport::new();
        mock.fail_reads(std::io::ErrorKind::BrokenPipe);
        let mut link = mock.clone();
        let mut buf = RxBuffer::new(8);

        let err = fill_from(&mut buf, &mut link, 8, T).unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::Io(_))));
    }
}
