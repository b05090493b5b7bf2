//! Tessera Keygen - Threshold keychain generation with BitGo
//!
//! This crate provides:
//! - The [`KeyGenCoordinator`] and its per-run state machine
//! - The [`RemoteCoordinator`] seam to BitGo and its HTTP client
//! - The [`KeychainStore`] seam with HTTP and in-memory stores
//! - Configuration loading

pub mod config;
pub mod coordinator;
mod http;
pub mod keychain;
pub mod remote;

pub use config::KeyGenConfig;
pub use coordinator::{
    resolve_bitgo_key, validate_round_payload, FinalizedKeys, GenerateKeychainsParams,
    KeyGenCoordinator, KeyGenRun, KeyGenState, KeychainsTriplet, TrustSettings,
};
pub use keychain::{
    AddKeychainRequest, HttpKeychainStore, InMemoryKeychainStore, KeychainRecord, KeychainStore,
};
pub use remote::{
    BitgoPublicKeys, HttpRemoteCoordinator, KeyGenRound, RemoteCoordinator, Round1Request,
    Round1Response, Round2Response, Round3Response, RoundRequest, SessionKeys, PROTOCOL_TYPE,
};
