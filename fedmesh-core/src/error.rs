/// Fedmesh Error Types
///
/// Error handling for codec, broker and crypto operations.
use thiserror::Error;

/// Main error type for fedmesh operations
#[derive(Error, Debug)]
pub enum FedError {
    /// Broker transport failure (publish, subscribe, connect)
    #[error("broker error: {0}")]
    Broker(String),

    /// Broker URI names an endpoint that is not bound
    #[error("broker endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// Broker URI scheme has no registered client implementation
    #[error("unsupported broker scheme in '{0}'")]
    UnsupportedScheme(String),

    /// Message arrived on a channel outside the federation namespace
    #[error("unknown control channel '{0}'")]
    UnknownChannel(String),

    /// JSON (de)serialization failure
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Sealing / opening failure, bad key material
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Message authentication tag did not verify
    #[error("MAC mismatch")]
    MacMismatch,

    /// Invalid or missing configuration
    #[error("config error: {0}")]
    Config(String),

    /// Channel to a worker or subscriber closed
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for fedmesh operations
pub type Result<T> = std::result::Result<T, FedError>;

impl FedError {
    /// Create a broker error with a message
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Create a crypto error with a message
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a config error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Decode-class errors discard the offending message; the worker
    /// continues.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::UnknownChannel(_) | Self::Codec(_) | Self::Crypto(_) | Self::MacMismatch
        )
    }
}
