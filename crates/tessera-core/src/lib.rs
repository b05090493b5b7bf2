//! Tessera Core - Shared types and cryptographic plumbing for threshold key generation
//!
//! This crate provides the pieces every participant in a Tessera key
//! generation run agrees on:
//!
//! - party, message and keychain types
//! - the [`DkgEngine`] seam a concrete DKG implementation plugs into
//! - the authenticated-encryption envelope used to relay protocol messages
//! - the pinned BitGo key table
//! - passphrase encryption of key shares

pub mod engine;
pub mod envelope;
pub mod error;
pub mod passphrase;
pub mod trust;
pub mod types;

pub use engine::{DkgEngine, DkgEngineFactory};
pub use envelope::{decrypt_and_verify, encrypt_and_auth, GpgKeyPair, GpgPublicKey};
pub use error::{Error, Result, TransportError};
pub use passphrase::{decrypt_private_material, encrypt_private_material};
pub use trust::{Environment, KeyClass, KeySet, ProtocolVersion, PubkeyTrustStore};
pub use types::{
    concat_public_keys, AuthEncMessage, CommonKeychain, EphemeralPublicKey, KeyShare, PartyId,
    ProtocolMessage, SessionId, CHAINCODE_SIZE,
};

/// Number of parties in a key generation run
pub const NUM_PARTIES: u16 = 3;

/// Signatures required to spend
pub const THRESHOLD: u16 = 2;

/// Keychain `keyType` for threshold keys
pub const KEY_TYPE_TSS: &str = "tss";
