use std::time::Duration;

use apcap_transport::Transport;
use bytes::BytesMut;

use crate::codec::{encode_frame, HEADER_LEN};
use crate::error::Result;

/// Encode one frame and write it completely to `transport`.
pub fn write_frame<T>(
    transport: &mut T,
    frame_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> Result<()>
where
    T: Transport + ?Sized,
{
    let mut wire = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_frame(frame_type, payload, &mut wire)?;
    transport.write_all(&wire, timeout)?;
    Ok(())
}
