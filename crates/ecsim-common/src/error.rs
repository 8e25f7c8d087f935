use thiserror::Error;

/// Simulator error types covering configuration, transport, and bus failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed endpoint string.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as supplied by the user.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Bind, accept, or connect failure at the transport boundary.
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame length outside the accepted range.
    #[error("invalid frame length {len} (accepted: 1..={max})")]
    FrameLength {
        /// Announced length.
        len: usize,
        /// Largest accepted frame.
        max: usize,
    },

    /// The virtual link is down.
    #[error("link down")]
    LinkDown,

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Convenience type alias for simulator operations.
pub type SimResult<T> = Result<T, SimError>;
