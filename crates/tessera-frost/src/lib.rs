//! # Tessera FROST
//!
//! [`DkgEngine`](tessera_core::DkgEngine) implemented over the FROST Ed25519
//! distributed key generation of the Zcash Foundation `frost-ed25519` crate.
//!
//! ## Protocol
//!
//! Each party holds an ephemeral Ed25519 key for the lifetime of one session.
//! The three ephemeral keys, concatenated in party order, bind the session:
//! every engine message carries a tag derived from them and is signed by the
//! sender's ephemeral key.
//!
//! ```text
//! first_message               broadcast   part1 commitments
//! handle_incoming_messages #1 p2p         part2 secret shares, one per peer
//! handle_incoming_messages #2 (none)      part3 key package
//! ```
//!
//! The chaincode of the common keychain is derived from the same binding, so
//! all three parties agree on it without another round.

pub mod error;
pub mod session;
pub mod types;

pub use error::{FrostError, Result};
pub use session::{FrostDkgFactory, FrostDkgSession};
pub use types::{DkgState, KeyShareMaterial};
