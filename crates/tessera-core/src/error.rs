//! Error types for Tessera key generation

use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating a threshold keychain
#[derive(Debug, Error)]
pub enum Error {
    /// A cross-round or cross-party consistency check failed
    #[error("Protocol invariant violation: {0}")]
    ProtocolInvariantViolation(String),

    /// An inbound message could not be authenticated against a trusted key
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Unknown environment or unprovisioned pinned key
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote coordinator or keychain store failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The local DKG engine rejected an operation
    #[error("DKG engine error: {0}")]
    Engine(String),

    /// Local cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A keychain record was rejected before storage
    #[error("Invalid keychain: {0}")]
    InvalidKeychain(String),
}

impl Error {
    /// Whether the failure means the parties did not converge on one key
    pub fn is_protocol_failure(&self) -> bool {
        matches!(
            self,
            Error::ProtocolInvariantViolation(_) | Error::SecurityViolation(_)
        )
    }

    /// Whether the failure came from the network layer
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Failures reported by a network collaborator
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never completed (connect, timeout, TLS)
    #[error("Network failure: {0}")]
    Network(String),

    /// The response body could not be decoded
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bitcode::Error> for Error {
    fn from(e: bitcode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Serialization(format!("Base64 decode failed: {}", e))
    }
}
