//! Error types for the feed bridge

use thiserror::Error;

/// Boxed cause carried by [`BridgeError::DuringProcessing`]
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// `start` was called while the engine was starting or running
    #[error("Already started")]
    AlreadyStarted,

    /// `stop` was called while the engine was already stopped
    #[error("Already stopped")]
    AlreadyStopped,

    /// Operation issued while the engine is not in the running state
    #[error("Engine not running: {operation} requires a running engine")]
    NotRunning {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Encoding or decoding failed while preparing or reading engine data
    #[error("{context}: {source}")]
    DuringProcessing {
        /// Human-readable description of what was being processed
        context: String,
        /// Underlying cause
        #[source]
        source: BoxedCause,
    },

    /// The engine reported a failure (false/non-zero return or no output)
    #[error("Unexpected fault: {0}")]
    UnexpectedFault(String),

    /// An identifier could not be turned into a blob address
    #[error("Addressing fault: {0}")]
    Addressing(String),

    /// A network or HMAC key did not decode to 32 bytes
    #[error("Invalid data key: {0}")]
    InvalidDataKey(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Wrap an encode/decode failure with context.
    pub fn processing(context: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        BridgeError::DuringProcessing {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;
