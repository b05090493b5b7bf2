//! Core types shared by the key generation participants

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Length of a chaincode appended to the group key in a common keychain
pub const CHAINCODE_SIZE: usize = 32;

/// One of the three fixed protocol participants
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PartyId {
    /// Wallet owner's key
    User = 0,
    /// Offline recovery key
    Backup = 1,
    /// Custodial co-signer
    Bitgo = 2,
}

impl PartyId {
    /// All parties in canonical order
    pub const ALL: [PartyId; 3] = [PartyId::User, PartyId::Backup, PartyId::Bitgo];

    /// Parties whose key shares are held locally by the coordinator
    pub const LOCAL: [PartyId; 2] = [PartyId::User, PartyId::Backup];

    /// Zero-based position of this party in concatenated key material
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Keychain `source` label
    pub fn source(&self) -> &'static str {
        match self {
            PartyId::User => "user",
            PartyId::Backup => "backup",
            PartyId::Bitgo => "bitgo",
        }
    }

    /// Whether this party must persist encrypted private material
    pub fn holds_private_material(&self) -> bool {
        !matches!(self, PartyId::Bitgo)
    }
}

impl TryFrom<u8> for PartyId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PartyId::User),
            1 => Ok(PartyId::Backup),
            2 => Ok(PartyId::Bitgo),
            other => Err(Error::Serialization(format!("Unknown party id {}", other))),
        }
    }
}

impl From<PartyId> for u8 {
    fn from(party: PartyId) -> u8 {
        party as u8
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source())
    }
}

/// Correlation token binding all rounds of one run together
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session id issued by the remote coordinator
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::ProtocolInvariantViolation(
                "Session ID is required".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A party's DKG initialization key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralPublicKey {
    pub party: PartyId,
    pub bytes: Vec<u8>,
}

impl EphemeralPublicKey {
    pub fn new(party: PartyId, bytes: Vec<u8>) -> Self {
        Self { party, bytes }
    }

    /// Base64 form used on the wire
    pub fn to_base64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.bytes)
    }

    /// Decode a base64 key received for `party`
    pub fn from_base64(party: PartyId, encoded: &str) -> Result<Self> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)?;
        if bytes.is_empty() {
            return Err(Error::ProtocolInvariantViolation(format!(
                "{} public key is empty",
                party
            )));
        }
        Ok(Self { party, bytes })
    }
}

/// Concatenate ephemeral keys in canonical party order
///
/// Fails unless exactly one key per party is supplied.
pub fn concat_public_keys(keys: &[EphemeralPublicKey]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for party in PartyId::ALL {
        let mut matching = keys.iter().filter(|k| k.party == party);
        let key = matching.next().ok_or_else(|| {
            Error::ProtocolInvariantViolation(format!("Missing {} public key", party))
        })?;
        if matching.next().is_some() {
            return Err(Error::ProtocolInvariantViolation(format!(
                "Duplicate {} public key",
                party
            )));
        }
        out.extend_from_slice(&key.bytes);
    }
    Ok(out)
}

/// An engine's outbound round message in cleartext
#[derive(Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub from: PartyId,
    /// `None` for broadcast messages
    pub to: Option<PartyId>,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    pub fn broadcast(from: PartyId, payload: Vec<u8>) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    pub fn p2p(from: PartyId, to: PartyId, payload: Vec<u8>) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    /// Whether `party` is an intended reader of this message
    pub fn is_for(&self, party: PartyId) -> bool {
        self.from != party && self.to.map_or(true, |to| to == party)
    }
}

impl std::fmt::Debug for ProtocolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Round-two payloads carry secret shares
        f.debug_struct("ProtocolMessage")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Wire form of a protocol message: encrypted for one recipient and signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEncMessage {
    pub from: PartyId,
    pub to: PartyId,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// A local party's final private key material
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    data: Vec<u8>,
}

impl KeyShare {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("data", &"[REDACTED]")
            .finish()
    }
}

/// Shared public key encoding all three parties must agree on
///
/// Lowercase hex of the group key followed by the chaincode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonKeychain(String);

impl CommonKeychain {
    /// Build from a group verifying key and chaincode
    pub fn from_parts(group_key: &[u8], chaincode: &[u8; CHAINCODE_SIZE]) -> Self {
        let mut encoded = hex::encode(group_key);
        encoded.push_str(&hex::encode(chaincode));
        Self(encoded)
    }

    /// Wrap a value reported by a remote party without normalizing it
    pub fn from_reported(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::ProtocolInvariantViolation(
                "Reported common keychain is empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommonKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serde helper for byte vectors carried as base64 strings
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
