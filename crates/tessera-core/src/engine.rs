//! Narrow interface to a per-party DKG cryptographic session
//!
//! The coordinator never touches key-share arithmetic. It drives one engine
//! per local party through the protocol:
//!
//! ```text
//! public_key ──► init_dkg(user ‖ backup ‖ bitgo) ──► first_message
//!      ──► handle_incoming_messages(round 1) ──► second messages
//!      ──► handle_incoming_messages(round 2) ──► (nothing) ──► key_share
//! ```

use crate::error::Result;
use crate::types::{CommonKeychain, EphemeralPublicKey, KeyShare, PartyId, ProtocolMessage};

/// Per-party DKG session
pub trait DkgEngine: Send + 'static {
    /// The party this session plays
    fn party(&self) -> PartyId;

    /// Ephemeral public key used to initialize every party's session
    fn public_key(&self) -> Result<EphemeralPublicKey>;

    /// Initialize with all parties' ephemeral keys concatenated in party order
    fn init_dkg(&mut self, concatenated_public_keys: &[u8]) -> Result<()>;

    /// Produce this party's first protocol message
    fn first_message(&mut self) -> Result<ProtocolMessage>;

    /// Consume a full round of messages, returning the next round's output
    ///
    /// Messages not addressed to this party are ignored. The terminal round
    /// returns an empty vector.
    fn handle_incoming_messages(
        &mut self,
        messages: &[ProtocolMessage],
    ) -> Result<Vec<ProtocolMessage>>;

    /// Final private key material, available once the protocol completed
    fn key_share(&self) -> Result<KeyShare>;

    /// Derive the shared public key encoding from key-share material
    fn common_keychain(key_share: &KeyShare) -> Result<CommonKeychain>
    where
        Self: Sized;
}

/// Creates fresh engines, one per local party per run
pub trait DkgEngineFactory: Send + Sync {
    type Engine: DkgEngine;

    fn create(&self, party: PartyId) -> Result<Self::Engine>;
}
