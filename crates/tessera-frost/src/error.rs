//! Error types for the FROST DKG engine

use thiserror::Error;

/// Result type for FROST operations
pub type Result<T> = std::result::Result<T, FrostError>;

/// Errors that can occur during a DKG session
#[derive(Debug, Error)]
pub enum FrostError {
    /// Operation called out of order
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// A round is missing a peer's package
    #[error("Missing {round} package from {party}")]
    MissingPackage { round: u8, party: String },

    /// A peer's ephemeral signature did not verify
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// A message was produced for a different session
    #[error("Session binding mismatch from {0}")]
    BindingMismatch(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<bitcode::Error> for FrostError {
    fn from(e: bitcode::Error) -> Self {
        FrostError::Deserialization(e.to_string())
    }
}

impl From<FrostError> for tessera_core::Error {
    fn from(e: FrostError) -> Self {
        match e {
            FrostError::InvalidSignature(_) | FrostError::BindingMismatch(_) => {
                tessera_core::Error::SecurityViolation(e.to_string())
            }
            other => tessera_core::Error::Engine(other.to_string()),
        }
    }
}
