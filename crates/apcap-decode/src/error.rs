/// Errors that can occur while decoding captured data.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input is shorter than the fixed layout requires.
    #[error("record too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
