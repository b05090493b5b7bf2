//! 2-of-3 FROST Ed25519 DKG session for one party

use std::collections::BTreeMap;

use frost_ed25519::keys::dkg as frost_dkg;
use frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use frost_ed25519::{Identifier, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use tessera_core::{
    CommonKeychain, DkgEngine, DkgEngineFactory, EphemeralPublicKey, KeyShare, PartyId,
    ProtocolMessage, NUM_PARTIES, THRESHOLD,
};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::error::{FrostError, Result};
use crate::types::{
    identifier_for, DkgRound, DkgState, KeyShareMaterial, SessionBinding, SignedPayload,
    EPHEMERAL_KEY_SIZE,
};

/// One party's DKG session
pub struct FrostDkgSession {
    party: PartyId,

    /// Current state
    state: DkgState,

    /// Ephemeral key authenticating this party's engine messages
    ephemeral: SigningKey,

    /// Set by `init_dkg`
    binding: Option<SessionBinding>,

    /// Peers' ephemeral keys, from the concatenated keys
    peer_keys: BTreeMap<PartyId, VerifyingKey>,

    round1_secret: Option<frost_dkg::round1::SecretPackage>,
    round2_secret: Option<frost_dkg::round2::SecretPackage>,

    /// Peers' round 1 packages, needed again for part 3
    received_round1: BTreeMap<Identifier, frost_dkg::round1::Package>,

    /// Encoded [`KeyShareMaterial`], once completed
    key_share: Option<Zeroizing<Vec<u8>>>,
}

impl FrostDkgSession {
    /// Create a session with a fresh ephemeral key
    pub fn new(party: PartyId) -> Self {
        Self {
            party,
            state: DkgState::Created,
            ephemeral: SigningKey::new(&mut OsRng),
            binding: None,
            peer_keys: BTreeMap::new(),
            round1_secret: None,
            round2_secret: None,
            received_round1: BTreeMap::new(),
            key_share: None,
        }
    }

    pub fn state(&self) -> DkgState {
        self.state
    }

    fn peers(&self) -> impl Iterator<Item = PartyId> + '_ {
        PartyId::ALL.into_iter().filter(move |p| *p != self.party)
    }

    fn require_state(&self, expected: DkgState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(FrostError::InvalidState(format!(
                "Cannot {} in state {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn binding(&self) -> Result<&SessionBinding> {
        self.binding
            .as_ref()
            .ok_or_else(|| FrostError::InvalidState("Session not initialized".to_string()))
    }

    fn ephemeral_key_bytes(&self) -> Result<Vec<u8>> {
        VerifyingKey::from(&self.ephemeral)
            .serialize()
            .map_err(|e| FrostError::Serialization(e.to_string()))
    }

    fn bind(&mut self, concatenated_public_keys: &[u8]) -> Result<()> {
        self.require_state(DkgState::Created, "initialize")?;

        let expected_len = EPHEMERAL_KEY_SIZE * PartyId::ALL.len();
        if concatenated_public_keys.len() != expected_len {
            return Err(FrostError::InvalidParameters(format!(
                "Expected {} bytes of public keys, got {}",
                expected_len,
                concatenated_public_keys.len()
            )));
        }

        let own = self.ephemeral_key_bytes()?;
        let mut peer_keys = BTreeMap::new();
        for (party, slot) in PartyId::ALL
            .into_iter()
            .zip(concatenated_public_keys.chunks_exact(EPHEMERAL_KEY_SIZE))
        {
            if party == self.party {
                if slot != own.as_slice() {
                    return Err(FrostError::InvalidParameters(format!(
                        "Own public key not found at {} slot",
                        party
                    )));
                }
                continue;
            }
            let key = VerifyingKey::deserialize(slot).map_err(|e| {
                FrostError::InvalidParameters(format!("Invalid {} public key: {}", party, e))
            })?;
            peer_keys.insert(party, key);
        }

        self.peer_keys = peer_keys;
        self.binding = Some(SessionBinding::derive(concatenated_public_keys));
        self.state = DkgState::Initialized;
        debug!("{} session bound to ephemeral keys", self.party);
        Ok(())
    }

    fn seal(&self, round: DkgRound, to: Option<PartyId>, package: Vec<u8>) -> Result<ProtocolMessage> {
        let tag = self.binding()?.tag;
        let sender = u8::from(self.party);
        let recipient = to.map(u8::from);

        let input = SignedPayload::signing_input(round as u8, sender, recipient, &tag, &package);
        let signature = self
            .ephemeral
            .sign(OsRng, &input)
            .serialize()
            .map_err(|e| FrostError::Serialization(e.to_string()))?;

        let payload = SignedPayload {
            round: round as u8,
            sender,
            recipient,
            tag,
            package,
            signature,
        }
        .to_bytes();

        Ok(match to {
            Some(to) => ProtocolMessage::p2p(self.party, to, payload),
            None => ProtocolMessage::broadcast(self.party, payload),
        })
    }

    /// Verify and unwrap the packages of one round, exactly one per peer
    fn open_round(
        &self,
        round: DkgRound,
        messages: &[ProtocolMessage],
    ) -> Result<BTreeMap<PartyId, Vec<u8>>> {
        let binding = self.binding()?;
        let mut packages = BTreeMap::new();

        for message in messages.iter().filter(|m| m.is_for(self.party)) {
            let peer_key = self.peer_keys.get(&message.from).ok_or_else(|| {
                FrostError::InvalidParameters(format!("Unknown sender {}", message.from))
            })?;

            let payload = SignedPayload::from_bytes(&message.payload)?;
            if payload.round != round as u8 {
                return Err(FrostError::InvalidParameters(format!(
                    "Expected {} message from {}, got round {}",
                    round, message.from, payload.round
                )));
            }
            if payload.sender != u8::from(message.from)
                || payload.recipient != message.to.map(u8::from)
            {
                return Err(FrostError::InvalidSignature(format!(
                    "Addressing of message from {} does not match its payload",
                    message.from
                )));
            }
            if payload.tag != binding.tag {
                return Err(FrostError::BindingMismatch(message.from.to_string()));
            }

            let signature = Signature::deserialize(&payload.signature)
                .map_err(|e| FrostError::InvalidSignature(e.to_string()))?;
            let input = SignedPayload::signing_input(
                payload.round,
                payload.sender,
                payload.recipient,
                &payload.tag,
                &payload.package,
            );
            peer_key.verify(&input, &signature).map_err(|_| {
                FrostError::InvalidSignature(format!("Ephemeral signature from {}", message.from))
            })?;

            if packages.insert(message.from, payload.package).is_some() {
                return Err(FrostError::InvalidParameters(format!(
                    "Duplicate {} message from {}",
                    round, message.from
                )));
            }
        }

        for peer in self.peers() {
            if !packages.contains_key(&peer) {
                return Err(FrostError::MissingPackage {
                    round: round as u8,
                    party: peer.to_string(),
                });
            }
        }

        Ok(packages)
    }

    fn generate_round1(&mut self) -> Result<ProtocolMessage> {
        self.require_state(DkgState::Initialized, "generate round 1")?;

        let (round1_secret, round1_package) = frost_dkg::part1(
            identifier_for(self.party)?,
            NUM_PARTIES,
            THRESHOLD,
            &mut OsRng,
        )
        .map_err(|e| FrostError::KeyGeneration(e.to_string()))?;

        let pkg_bytes = round1_package
            .serialize()
            .map_err(|e| FrostError::Serialization(e.to_string()))?;

        let message = self.seal(DkgRound::Commitments, None, pkg_bytes)?;
        self.round1_secret = Some(round1_secret);
        self.state = DkgState::Round1Generated;
        Ok(message)
    }

    fn generate_round2(&mut self, messages: &[ProtocolMessage]) -> Result<Vec<ProtocolMessage>> {
        let opened = self.open_round(DkgRound::Commitments, messages)?;

        let mut frost_round1_packages = BTreeMap::new();
        for (sender, bytes) in &opened {
            let frost_pkg = frost_dkg::round1::Package::deserialize(bytes)
                .map_err(|e| FrostError::Deserialization(e.to_string()))?;
            frost_round1_packages.insert(identifier_for(*sender)?, frost_pkg);
        }

        let round1_secret = self
            .round1_secret
            .take()
            .ok_or_else(|| FrostError::InvalidState("Round 1 secret missing".to_string()))?;

        let (round2_secret, round2_packages) =
            frost_dkg::part2(round1_secret, &frost_round1_packages)
                .map_err(|e| FrostError::KeyGeneration(e.to_string()))?;

        let mut outbound = Vec::with_capacity(round2_packages.len());
        for peer in self.peers() {
            let frost_pkg = round2_packages
                .get(&identifier_for(peer)?)
                .ok_or_else(|| FrostError::KeyGeneration(format!("No share for {}", peer)))?;
            let pkg_bytes = frost_pkg
                .serialize()
                .map_err(|e| FrostError::Serialization(e.to_string()))?;
            outbound.push(self.seal(DkgRound::Shares, Some(peer), pkg_bytes)?);
        }

        self.round2_secret = Some(round2_secret);
        self.received_round1 = frost_round1_packages;
        self.state = DkgState::Round2Generated;
        Ok(outbound)
    }

    fn finalize(&mut self, messages: &[ProtocolMessage]) -> Result<()> {
        let opened = self.open_round(DkgRound::Shares, messages)?;

        let mut frost_round2_packages = BTreeMap::new();
        for (sender, bytes) in &opened {
            let frost_pkg = frost_dkg::round2::Package::deserialize(bytes)
                .map_err(|e| FrostError::Deserialization(e.to_string()))?;
            frost_round2_packages.insert(identifier_for(*sender)?, frost_pkg);
        }

        let round2_secret = self
            .round2_secret
            .take()
            .ok_or_else(|| FrostError::InvalidState("Round 2 secret missing".to_string()))?;

        let (key_package, pubkey_package) = frost_dkg::part3(
            &round2_secret,
            &self.received_round1,
            &frost_round2_packages,
        )
        .map_err(|e| FrostError::KeyGeneration(e.to_string()))?;

        let material = KeyShareMaterial {
            party: u8::from(self.party),
            key_package: key_package
                .serialize()
                .map_err(|e| FrostError::Serialization(e.to_string()))?,
            public_key_package: pubkey_package
                .serialize()
                .map_err(|e| FrostError::Serialization(e.to_string()))?,
            chaincode: self.binding()?.chaincode,
        };

        self.key_share = Some(Zeroizing::new(material.to_bytes()));
        self.received_round1.clear();
        self.state = DkgState::Completed;
        debug!("{} DKG completed", self.party);
        Ok(())
    }

    /// Record a failed step so later calls are rejected
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{} DKG step failed: {}", self.party, e);
            self.state = DkgState::Failed;
            self.round1_secret = None;
            self.round2_secret = None;
        }
        result
    }
}

impl DkgEngine for FrostDkgSession {
    fn party(&self) -> PartyId {
        self.party
    }

    fn public_key(&self) -> tessera_core::Result<EphemeralPublicKey> {
        Ok(EphemeralPublicKey::new(self.party, self.ephemeral_key_bytes()?))
    }

    #[instrument(skip(self, concatenated_public_keys), fields(party = %self.party))]
    fn init_dkg(&mut self, concatenated_public_keys: &[u8]) -> tessera_core::Result<()> {
        let result = self.bind(concatenated_public_keys);
        Ok(self.track(result)?)
    }

    fn first_message(&mut self) -> tessera_core::Result<ProtocolMessage> {
        let result = self.generate_round1();
        Ok(self.track(result)?)
    }

    #[instrument(skip(self, messages), fields(party = %self.party, count = messages.len()))]
    fn handle_incoming_messages(
        &mut self,
        messages: &[ProtocolMessage],
    ) -> tessera_core::Result<Vec<ProtocolMessage>> {
        let result = match self.state {
            DkgState::Round1Generated => self.generate_round2(messages),
            DkgState::Round2Generated => self.finalize(messages).map(|()| Vec::new()),
            state => Err(FrostError::InvalidState(format!(
                "Cannot handle messages in state {:?}",
                state
            ))),
        };
        Ok(self.track(result)?)
    }

    fn key_share(&self) -> tessera_core::Result<KeyShare> {
        let bytes = self
            .key_share
            .as_ref()
            .ok_or_else(|| FrostError::InvalidState("DKG not completed".to_string()))?;
        Ok(KeyShare::new(bytes.to_vec()))
    }

    fn common_keychain(key_share: &KeyShare) -> tessera_core::Result<CommonKeychain> {
        let material = KeyShareMaterial::from_bytes(key_share.as_bytes())?;
        let pubkey_package = PublicKeyPackage::deserialize(&material.public_key_package)
            .map_err(|e| FrostError::Deserialization(e.to_string()))?;

        // The share must belong to the group it claims
        let key_package = KeyPackage::deserialize(&material.key_package)
            .map_err(|e| FrostError::Deserialization(e.to_string()))?;
        if key_package.verifying_key() != pubkey_package.verifying_key() {
            return Err(FrostError::InvalidParameters(
                "Key package does not match public key package".to_string(),
            )
            .into());
        }

        let group_key = pubkey_package
            .verifying_key()
            .serialize()
            .map_err(|e| FrostError::Serialization(e.to_string()))?;
        Ok(CommonKeychain::from_parts(&group_key, &material.chaincode))
    }
}

/// Creates [`FrostDkgSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FrostDkgFactory;

impl DkgEngineFactory for FrostDkgFactory {
    type Engine = FrostDkgSession;

    fn create(&self, party: PartyId) -> tessera_core::Result<FrostDkgSession> {
        Ok(FrostDkgSession::new(party))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_core::concat_public_keys;

    fn bound_sessions() -> Vec<FrostDkgSession> {
        let mut sessions: Vec<_> = PartyId::ALL.into_iter().map(FrostDkgSession::new).collect();
        let keys: Vec<_> = sessions.iter().map(|s| s.public_key().unwrap()).collect();
        let concat = concat_public_keys(&keys).unwrap();
        for session in &mut sessions {
            session.init_dkg(&concat).unwrap();
        }
        sessions
    }

    fn run_dkg(sessions: &mut [FrostDkgSession]) -> Vec<KeyShare> {
        let round1: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.first_message().unwrap())
            .collect();

        let mut round2 = Vec::new();
        for session in sessions.iter_mut() {
            round2.extend(session.handle_incoming_messages(&round1).unwrap());
        }
        assert_eq!(round2.len(), 6);

        for session in sessions.iter_mut() {
            assert!(session.handle_incoming_messages(&round2).unwrap().is_empty());
        }

        sessions.iter().map(|s| s.key_share().unwrap()).collect()
    }

    #[test]
    fn test_three_party_dkg() {
        let mut sessions = bound_sessions();
        let shares = run_dkg(&mut sessions);

        let keychains: Vec<_> = shares
            .iter()
            .map(|s| FrostDkgSession::common_keychain(s).unwrap())
            .collect();
        assert_eq!(keychains[0], keychains[1]);
        assert_eq!(keychains[1], keychains[2]);
        assert_eq!(keychains[0].as_str().len(), 128);

        assert_ne!(shares[0], shares[1]);
        assert!(sessions.iter().all(|s| s.state() == DkgState::Completed));
    }

    #[test]
    fn test_round2_messages_are_peer_to_peer() {
        let mut sessions = bound_sessions();
        let round1: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.first_message().unwrap())
            .collect();
        assert!(round1.iter().all(|m| m.to.is_none()));

        let out = sessions[0].handle_incoming_messages(&round1).unwrap();
        let recipients: Vec<_> = out.iter().map(|m| m.to).collect();
        assert_eq!(recipients, vec![Some(PartyId::Backup), Some(PartyId::Bitgo)]);
    }

    #[test]
    fn test_init_rejects_missing_own_key() {
        let mut session = FrostDkgSession::new(PartyId::User);
        let others: Vec<_> = PartyId::ALL
            .into_iter()
            .map(|p| FrostDkgSession::new(p).public_key().unwrap())
            .collect();
        let concat = concat_public_keys(&others).unwrap();

        let err = session.init_dkg(&concat).unwrap_err();
        assert!(matches!(err, tessera_core::Error::Engine(_)));
        assert_eq!(session.state(), DkgState::Failed);
    }

    #[test]
    fn test_init_rejects_wrong_length() {
        let mut session = FrostDkgSession::new(PartyId::Backup);
        assert!(session.init_dkg(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_first_message_requires_init() {
        let mut session = FrostDkgSession::new(PartyId::User);
        assert!(session.first_message().is_err());
    }

    #[test]
    fn test_foreign_session_binding_is_rejected() {
        let mut sessions = bound_sessions();
        let mut foreign = bound_sessions();

        let mut round1: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.first_message().unwrap())
            .collect();
        // Swap in BitGo's message from a different run
        round1[2] = foreign[2].first_message().unwrap();

        let err = sessions[0].handle_incoming_messages(&round1).unwrap_err();
        assert!(matches!(err, tessera_core::Error::SecurityViolation(_)));
    }

    #[test]
    fn test_tampered_package_is_rejected() {
        let mut sessions = bound_sessions();
        let mut round1: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.first_message().unwrap())
            .collect();

        let mut payload = SignedPayload::from_bytes(&round1[1].payload).unwrap();
        let last = payload.package.len() - 1;
        payload.package[last] ^= 0x01;
        round1[1].payload = payload.to_bytes();

        let err = sessions[0].handle_incoming_messages(&round1).unwrap_err();
        assert!(matches!(err, tessera_core::Error::SecurityViolation(_)));
    }

    #[test]
    fn test_missing_peer_message() {
        let mut sessions = bound_sessions();
        let round1: Vec<_> = sessions
            .iter_mut()
            .map(|s| s.first_message().unwrap())
            .collect();

        let err = sessions[0]
            .handle_incoming_messages(&round1[..2])
            .unwrap_err();
        assert!(matches!(err, tessera_core::Error::Engine(_)));
    }

    #[test]
    fn test_key_share_before_completion() {
        let sessions = bound_sessions();
        assert!(sessions[0].key_share().is_err());
    }

    #[test]
    fn test_factory_creates_party_sessions() {
        let session = FrostDkgFactory.create(PartyId::Backup).unwrap();
        assert_eq!(session.party(), PartyId::Backup);
        assert_eq!(session.state(), DkgState::Created);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_flipped_payload_byte_is_rejected(
            in_signature in any::<bool>(),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut sessions = bound_sessions();
            let mut round1: Vec<_> = sessions
                .iter_mut()
                .map(|s| s.first_message().unwrap())
                .collect();

            let mut payload = SignedPayload::from_bytes(&round1[2].payload).unwrap();
            let field = if in_signature {
                &mut payload.signature
            } else {
                &mut payload.package
            };
            let i = position.index(field.len());
            field[i] ^= 1 << bit;
            round1[2].payload = payload.to_bytes();

            let err = sessions[0].handle_incoming_messages(&round1).unwrap_err();
            prop_assert!(matches!(err, tessera_core::Error::SecurityViolation(_)));
            prop_assert_eq!(sessions[0].state(), DkgState::Failed);
        }
    }
}
