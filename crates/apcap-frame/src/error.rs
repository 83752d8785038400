/// Errors that can occur during frame encoding and buffer filling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in a frame (the length byte covers the header).
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The underlying transport failed.
    #[error("frame transport error: {0}")]
    Transport(#[from] apcap_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
