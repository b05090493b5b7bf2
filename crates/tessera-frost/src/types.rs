//! Wire and storage formats used inside the FROST engine

use bitcode::{Decode, Encode};
use frost_ed25519::Identifier;
use sha2::{Digest, Sha256};
use tessera_core::{PartyId, CHAINCODE_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{FrostError, Result};

/// Serialized size of an Ed25519 verifying key
pub const EPHEMERAL_KEY_SIZE: usize = 32;

const SESSION_DOMAIN: &[u8] = b"tessera-dkg-v1/session";
const CHAINCODE_DOMAIN: &[u8] = b"tessera-dkg-v1/chaincode";
const PAYLOAD_DOMAIN: &[u8] = b"tessera-dkg-v1/payload";

/// Protocol round an engine message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DkgRound {
    /// Commitments and proof of knowledge, broadcast
    Commitments = 1,
    /// Secret shares, peer-to-peer
    Shares = 2,
}

impl std::fmt::Display for DkgRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DkgRound::Commitments => f.write_str("round 1"),
            DkgRound::Shares => f.write_str("round 2"),
        }
    }
}

/// DKG session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkgState {
    /// Ephemeral key generated, waiting for the other parties' keys
    Created,
    /// Bound to the three ephemeral keys
    Initialized,
    /// Round 1 package sent, waiting for peers' packages
    Round1Generated,
    /// Round 2 packages sent, waiting for peers' packages
    Round2Generated,
    /// Key share available
    Completed,
    /// A round failed; the session cannot continue
    Failed,
}

/// FROST identifier for a party (index + 1)
pub fn identifier_for(party: PartyId) -> Result<Identifier> {
    Identifier::try_from(party.index() as u16 + 1)
        .map_err(|e| FrostError::InvalidParameters(e.to_string()))
}

/// What every party derives from the concatenated ephemeral keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    /// Tag carried on every engine message of this session
    pub tag: [u8; 32],
    /// Chaincode appended to the group key in the common keychain
    pub chaincode: [u8; CHAINCODE_SIZE],
}

impl SessionBinding {
    pub fn derive(concatenated_public_keys: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SESSION_DOMAIN);
        hasher.update(concatenated_public_keys);
        let tag = hasher.finalize().into();

        let mut hasher = Sha256::new();
        hasher.update(CHAINCODE_DOMAIN);
        hasher.update(concatenated_public_keys);
        let chaincode = hasher.finalize().into();

        Self { tag, chaincode }
    }
}

/// An engine message: a FROST package authenticated by the sender's
/// ephemeral key and bound to the session
#[derive(Debug, Clone, Encode, Decode)]
pub struct SignedPayload {
    pub round: u8,
    pub sender: u8,
    pub recipient: Option<u8>,
    pub tag: [u8; 32],
    pub package: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedPayload {
    /// Bytes covered by the ephemeral signature
    pub fn signing_input(
        round: u8,
        sender: u8,
        recipient: Option<u8>,
        tag: &[u8; 32],
        package: &[u8],
    ) -> Vec<u8> {
        let mut input = Vec::with_capacity(PAYLOAD_DOMAIN.len() + 36 + package.len());
        input.extend_from_slice(PAYLOAD_DOMAIN);
        input.push(round);
        input.push(sender);
        input.push(recipient.unwrap_or(u8::MAX));
        input.extend_from_slice(tag);
        input.extend_from_slice(package);
        input
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bitcode::decode(bytes)?)
    }
}

/// Contents of a [`tessera_core::KeyShare`] produced by this engine
#[derive(Clone, Encode, Decode, Zeroize, ZeroizeOnDrop)]
pub struct KeyShareMaterial {
    pub party: u8,
    pub key_package: Vec<u8>,
    pub public_key_package: Vec<u8>,
    pub chaincode: [u8; CHAINCODE_SIZE],
}

impl KeyShareMaterial {
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bitcode::decode(bytes)?)
    }
}

impl std::fmt::Debug for KeyShareMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShareMaterial")
            .field("party", &self.party)
            .field("key_package", &"[REDACTED]")
            .finish()
    }
}
