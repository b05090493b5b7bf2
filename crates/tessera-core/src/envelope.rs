//! Authenticated encryption envelope for relayed protocol messages
//!
//! Every message that crosses the remote coordinator is sealed for exactly
//! one recipient and signed by its sender:
//!
//! - **ECDH (secp256k1) + HKDF-SHA256** derives a per-pair message key
//! - **ChaCha20-Poly1305** encrypts the body, with `(from, to)` as associated data
//! - **ECDSA (secp256k1)** signs `domain ‖ from ‖ to ‖ ciphertext`
//!
//! The signature is checked before any decryption is attempted.
//!
//! # Armor
//!
//! Public keys travel as armored text wrapping the 33-byte compressed point:
//!
//! ```text
//! -----BEGIN TESSERA PUBLIC KEY BLOCK-----
//! <base64>
//! -----END TESSERA PUBLIC KEY BLOCK-----
//! ```

use base64::Engine;
use bitcode::{Decode, Encode};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::types::{AuthEncMessage, PartyId, ProtocolMessage};

const ARMOR_HEADER: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----";
const ARMOR_FOOTER: &str = "-----END TESSERA PUBLIC KEY BLOCK-----";

/// Size of the nonce for ChaCha20-Poly1305
const NONCE_SIZE: usize = 12;

/// Size of a compressed secp256k1 point
const COMPRESSED_KEY_SIZE: usize = 33;

const KDF_INFO: &[u8] = b"tessera-envelope-v1/key";
const SIGNATURE_DOMAIN: &[u8] = b"tessera-envelope-v1/sig";

/// A party's envelope identity for one run
pub struct GpgKeyPair {
    party: PartyId,
    secret: k256::SecretKey,
}

impl GpgKeyPair {
    /// Generate a fresh keypair for `party`
    pub fn generate(party: PartyId) -> Self {
        Self {
            party,
            secret: k256::SecretKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn party(&self) -> PartyId {
        self.party
    }

    pub fn public_key(&self) -> GpgPublicKey {
        GpgPublicKey {
            party: self.party,
            key: self.secret.public_key(),
        }
    }

    /// Exportable public half
    pub fn armored_public_key(&self) -> String {
        self.public_key().armored()
    }
}

impl std::fmt::Debug for GpgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpgKeyPair")
            .field("party", &self.party)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A party's envelope public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpgPublicKey {
    party: PartyId,
    key: k256::PublicKey,
}

impl GpgPublicKey {
    /// Parse an armored key and bind it to `party`
    pub fn from_armored(party: PartyId, armored: &str) -> Result<Self> {
        let bytes = dearmor(armored)?;
        let key = k256::PublicKey::from_sec1_bytes(&bytes)
            .map_err(|e| Error::Crypto(format!("Invalid public key: {}", e)))?;
        Ok(Self { party, key })
    }

    pub fn party(&self) -> PartyId {
        self.party
    }

    /// Compressed SEC1 encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn armored(&self) -> String {
        armor(&self.to_bytes())
    }
}

/// Wrap raw key bytes in armor
pub fn armor(bytes: &[u8]) -> String {
    format!(
        "{}\n{}\n{}\n",
        ARMOR_HEADER,
        base64::engine::general_purpose::STANDARD.encode(bytes),
        ARMOR_FOOTER
    )
}

/// Extract and structurally check the key bytes inside an armor block
pub fn dearmor(armored: &str) -> Result<Vec<u8>> {
    let body = armored
        .trim()
        .strip_prefix(ARMOR_HEADER)
        .and_then(|rest| rest.strip_suffix(ARMOR_FOOTER))
        .ok_or_else(|| Error::Crypto("Missing public key armor".to_string()))?;

    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::Crypto(format!("Invalid armor body: {}", e)))?;

    if bytes.len() != COMPRESSED_KEY_SIZE || !matches!(bytes[0], 0x02 | 0x03) {
        return Err(Error::Crypto(
            "Armored key is not a compressed secp256k1 point".to_string(),
        ));
    }
    Ok(bytes)
}

/// Encrypted body; keeps broadcast messages distinguishable after opening
#[derive(Encode, Decode)]
struct SealedBody {
    broadcast: bool,
    payload: Vec<u8>,
}

/// Seal each message for `recipient`, signed by its declared sender
///
/// The sender's private key is picked from `senders` by `message.from`.
pub fn encrypt_and_auth(
    messages: &[ProtocolMessage],
    senders: &[GpgKeyPair],
    recipient: &GpgPublicKey,
) -> Result<Vec<AuthEncMessage>> {
    let mut sealed = Vec::with_capacity(messages.len());

    for message in messages {
        let sender = senders
            .iter()
            .find(|k| k.party == message.from)
            .ok_or_else(|| {
                Error::Crypto(format!("No private key for sender {}", message.from))
            })?;

        if let Some(to) = message.to {
            if to != recipient.party {
                return Err(Error::ProtocolInvariantViolation(format!(
                    "Message from {} is addressed to {}, not {}",
                    message.from, to, recipient.party
                )));
            }
        }

        let key = message_key(&sender.secret, &recipient.key, message.from, recipient.party)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let body = Zeroizing::new(bitcode::encode(&SealedBody {
            broadcast: message.to.is_none(),
            payload: message.payload.clone(),
        }));
        let aad = [u8::from(message.from), u8::from(recipient.party)];

        let encrypted = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: body.as_slice(),
                    aad: &aad,
                },
            )
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + encrypted.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&encrypted);

        let signing_key = SigningKey::from(&sender.secret);
        let signature: Signature =
            signing_key.sign(&signing_input(message.from, recipient.party, &ciphertext));

        sealed.push(AuthEncMessage {
            from: message.from,
            to: recipient.party,
            ciphertext,
            signature: signature.to_bytes().to_vec(),
        });
    }

    debug!("Sealed {} messages for {}", sealed.len(), recipient.party);
    Ok(sealed)
}

/// Verify and open each message
///
/// The signature is checked against the `trusted` key matching the declared
/// sender; the body is opened with the `recipients` key matching `to`.
pub fn decrypt_and_verify(
    messages: &[AuthEncMessage],
    trusted: &[GpgPublicKey],
    recipients: &[GpgKeyPair],
) -> Result<Vec<ProtocolMessage>> {
    let mut opened = Vec::with_capacity(messages.len());

    for message in messages {
        let sender = trusted
            .iter()
            .find(|k| k.party == message.from)
            .ok_or_else(|| {
                Error::SecurityViolation(format!("No trusted key for sender {}", message.from))
            })?;

        let signature = Signature::from_slice(&message.signature).map_err(|_| {
            Error::SecurityViolation(format!("Malformed signature from {}", message.from))
        })?;
        VerifyingKey::from(&sender.key)
            .verify(
                &signing_input(message.from, message.to, &message.ciphertext),
                &signature,
            )
            .map_err(|_| {
                Error::SecurityViolation(format!(
                    "Signature verification failed for message from {}",
                    message.from
                ))
            })?;

        let recipient = recipients
            .iter()
            .find(|k| k.party == message.to)
            .ok_or_else(|| {
                Error::SecurityViolation(format!(
                    "Message addressed to {} which is not held locally",
                    message.to
                ))
            })?;

        if message.ciphertext.len() < NONCE_SIZE {
            return Err(Error::SecurityViolation(
                "Ciphertext too short".to_string(),
            ));
        }
        let (nonce, encrypted) = message.ciphertext.split_at(NONCE_SIZE);

        let key = message_key(&recipient.secret, &sender.key, message.from, message.to)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;
        let aad = [u8::from(message.from), u8::from(message.to)];

        let body = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: encrypted,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    Error::SecurityViolation(format!(
                        "Decryption failed for message from {}",
                        message.from
                    ))
                })?,
        );

        let body: SealedBody = bitcode::decode(body.as_slice()).map_err(|_| {
            Error::SecurityViolation(format!("Malformed body from {}", message.from))
        })?;

        opened.push(ProtocolMessage {
            from: message.from,
            to: if body.broadcast { None } else { Some(message.to) },
            payload: body.payload,
        });
    }

    Ok(opened)
}

/// Derive the symmetric key shared by a sender/recipient pair
fn message_key(
    own: &k256::SecretKey,
    peer: &k256::PublicKey,
    from: PartyId,
    to: PartyId,
) -> Result<Zeroizing<[u8; 32]>> {
    let shared = k256::ecdh::diffie_hellman(own.to_nonzero_scalar(), peer.as_affine());
    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());

    let mut info = KDF_INFO.to_vec();
    info.push(u8::from(from));
    info.push(u8::from(to));

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, key.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

fn signing_input(from: PartyId, to: PartyId, ciphertext: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 2 + ciphertext.len());
    input.extend_from_slice(SIGNATURE_DOMAIN);
    input.push(u8::from(from));
    input.push(u8::from(to));
    input.extend_from_slice(ciphertext);
    input
}
