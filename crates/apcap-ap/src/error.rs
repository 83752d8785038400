use apcap_frame::FrameError;
use apcap_transport::TransportError;

use crate::controller::CaptureState;

/// Errors that can occur while controlling the access point.
#[derive(Debug, thiserror::Error)]
pub enum ApError {
    /// Transport-level error. Fatal for the operation in progress.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// The access point answered a command with unexpected bytes, or not at all.
    #[error("unexpected response: expected {expected:02X?}, received {actual:02X?}")]
    ProtocolMismatch { expected: Vec<u8>, actual: Vec<u8> },

    /// The operation is not allowed in the current capture state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    /// The capture thread could not be started or did not exit cleanly.
    #[error("capture thread failed: {0}")]
    CaptureThread(String),

    /// The transport was lost with a failed capture thread.
    #[error("transport is no longer available")]
    TransportUnavailable,
}

impl From<FrameError> for ApError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(err) => ApError::Transport(err),
            other => ApError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApError>;
