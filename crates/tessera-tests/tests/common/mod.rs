//! In-process BitGo for end-to-end key generation tests
//!
//! `FakeBitgo` answers the three rounds with a real FROST session of its own,
//! so a run against it exercises the full protocol. Faults can be switched on
//! per test to make it misbehave in one specific way.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{
    concat_public_keys, decrypt_and_verify, encrypt_and_auth, AuthEncMessage, DkgEngine,
    EphemeralPublicKey, Environment, Error, GpgKeyPair, GpgPublicKey, KeyClass, PartyId,
    ProtocolMessage, Result, TransportError,
};
use tessera_frost::{FrostDkgFactory, FrostDkgSession};
use tessera_keygen::{
    InMemoryKeychainStore, KeyGenCoordinator, RemoteCoordinator, Round1Request, Round1Response,
    Round2Response, Round3Response, RoundRequest, SessionKeys, TrustSettings,
};
use tokio::sync::Mutex;

/// Ways the fake can misbehave
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Session id returned from round 2 instead of the real one
    pub round2_session_id: Option<String>,
    /// Session id returned from round 3 instead of the real one
    pub round3_session_id: Option<String>,
    /// Flip a ciphertext byte of the round 2 response
    pub tamper_round2: bool,
    /// Sign responses with a key nobody trusts
    pub rogue_signer: bool,
    /// Report this common keychain instead of the derived one
    pub common_keychain: Option<String>,
    /// Fail this round (1-3) with an HTTP 503
    pub unavailable_round: Option<u8>,
    /// Serve no MPCv2 envelope key
    pub withhold_public_key: bool,
}

#[derive(Default)]
struct Session {
    id: String,
    engine: Option<FrostDkgSession>,
    user_gpg: Option<GpgPublicKey>,
    backup_gpg: Option<GpgPublicKey>,
    /// BitGo's peer-to-peer shares, released in round 3
    shares: Vec<ProtocolMessage>,
}

pub struct FakeBitgo {
    gpg: GpgKeyPair,
    rogue: GpgKeyPair,
    faults: Faults,
    session: Mutex<Session>,
    pub round1_calls: AtomicUsize,
    pub round2_calls: AtomicUsize,
    pub round3_calls: AtomicUsize,
    pub public_key_calls: AtomicUsize,
}

impl Default for FakeBitgo {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBitgo {
    pub fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            gpg: GpgKeyPair::generate(PartyId::Bitgo),
            rogue: GpgKeyPair::generate(PartyId::Bitgo),
            faults,
            session: Mutex::new(Session::default()),
            round1_calls: AtomicUsize::new(0),
            round2_calls: AtomicUsize::new(0),
            round3_calls: AtomicUsize::new(0),
            public_key_calls: AtomicUsize::new(0),
        }
    }

    pub fn armored_public_key(&self) -> String {
        self.gpg.armored_public_key()
    }

    /// Trust settings for a non-pinned environment that trusts this fake
    pub fn trust_settings(&self) -> TrustSettings {
        TrustSettings {
            environment: Environment::Local,
            key_class: KeyClass::Onprem,
            bitgo_gpg_public_key: Some(self.armored_public_key()),
        }
    }

    pub fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> [usize; 3] {
        [
            self.round1_calls.load(Ordering::SeqCst),
            self.round2_calls.load(Ordering::SeqCst),
            self.round3_calls.load(Ordering::SeqCst),
        ]
    }

    fn check_available(&self, round: u8) -> Result<()> {
        if self.faults.unavailable_round == Some(round) {
            return Err(TransportError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn signer(&self) -> &GpgKeyPair {
        if self.faults.rogue_signer {
            &self.rogue
        } else {
            &self.gpg
        }
    }

    fn seal(&self, messages: &[ProtocolMessage], to: &GpgPublicKey) -> Result<Vec<AuthEncMessage>> {
        encrypt_and_auth(messages, std::slice::from_ref(self.signer()), to)
    }

    fn open(&self, session: &Session, payload: &[AuthEncMessage]) -> Result<Vec<ProtocolMessage>> {
        let trusted = [
            session.user_gpg.clone().ok_or_else(missing_round1)?,
            session.backup_gpg.clone().ok_or_else(missing_round1)?,
        ];
        decrypt_and_verify(payload, &trusted, std::slice::from_ref(&self.gpg))
    }
}

fn missing_round1() -> Error {
    Error::ProtocolInvariantViolation("Round 1 has not run".to_string())
}

fn check_session(session: &Session, request: &RoundRequest) -> Result<()> {
    if request.session_id != session.id {
        return Err(TransportError::Http {
            status: 400,
            body: format!("unknown session {}", request.session_id),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl RemoteCoordinator for FakeBitgo {
    async fn bitgo_public_key(&self, _enterprise: &str) -> Result<Option<String>> {
        self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.withhold_public_key {
            return Ok(None);
        }
        Ok(Some(self.armored_public_key()))
    }

    async fn round1(&self, _enterprise: &str, request: Round1Request) -> Result<Round1Response> {
        self.round1_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(1)?;

        let mut engine = FrostDkgSession::new(PartyId::Bitgo);
        let own = engine.public_key()?;
        let keys = [
            EphemeralPublicKey::from_base64(PartyId::User, &request.user_pub_key)?,
            EphemeralPublicKey::from_base64(PartyId::Backup, &request.backup_pub_key)?,
            own.clone(),
        ];
        engine.init_dkg(&concat_public_keys(&keys)?)?;

        let mut session = self.session.lock().await;
        *session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            engine: Some(engine),
            user_gpg: Some(GpgPublicKey::from_armored(
                PartyId::User,
                &request.user_gpg_public_key,
            )?),
            backup_gpg: Some(GpgPublicKey::from_armored(
                PartyId::Backup,
                &request.backup_gpg_public_key,
            )?),
            shares: Vec::new(),
        };

        Ok(Round1Response {
            session_keys: SessionKeys {
                bitgo: own.to_base64(),
            },
            session_id: session.id.clone(),
        })
    }

    async fn round2(&self, _enterprise: &str, request: RoundRequest) -> Result<Round2Response> {
        self.round2_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(2)?;

        let mut session = self.session.lock().await;
        check_session(&session, &request)?;
        let opened = self.open(&session, &request.payload)?;

        let engine = session.engine.as_mut().ok_or_else(missing_round1)?;
        let first = engine.first_message()?;
        let shares = engine.handle_incoming_messages(&opened)?;
        session.shares = shares;

        let user_gpg = session.user_gpg.clone().ok_or_else(missing_round1)?;
        let backup_gpg = session.backup_gpg.clone().ok_or_else(missing_round1)?;
        let mut payload = self.seal(std::slice::from_ref(&first), &user_gpg)?;
        payload.extend(self.seal(std::slice::from_ref(&first), &backup_gpg)?);

        if self.faults.tamper_round2 {
            payload[0].ciphertext[20] ^= 0x80;
        }

        Ok(Round2Response {
            session_id: self
                .faults
                .round2_session_id
                .clone()
                .unwrap_or_else(|| session.id.clone()),
            payload,
        })
    }

    async fn round3(&self, _enterprise: &str, request: RoundRequest) -> Result<Round3Response> {
        self.round3_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(3)?;

        let mut session = self.session.lock().await;
        check_session(&session, &request)?;
        let inbound = self.open(&session, &request.payload)?;

        let engine = session.engine.as_mut().ok_or_else(missing_round1)?;
        engine.handle_incoming_messages(&inbound)?;
        let key_share = engine.key_share()?;
        let common_keychain = FrostDkgSession::common_keychain(&key_share)?;

        let user_gpg = session.user_gpg.clone().ok_or_else(missing_round1)?;
        let backup_gpg = session.backup_gpg.clone().ok_or_else(missing_round1)?;
        let for_user: Vec<_> = session
            .shares
            .iter()
            .filter(|m| m.to == Some(PartyId::User))
            .cloned()
            .collect();
        let for_backup: Vec<_> = session
            .shares
            .iter()
            .filter(|m| m.to == Some(PartyId::Backup))
            .cloned()
            .collect();

        let mut payload = self.seal(&for_user, &user_gpg)?;
        payload.extend(self.seal(&for_backup, &backup_gpg)?);

        Ok(Round3Response {
            session_id: self
                .faults
                .round3_session_id
                .clone()
                .unwrap_or_else(|| session.id.clone()),
            payload,
            bitgo_common_keychain: self
                .faults
                .common_keychain
                .clone()
                .unwrap_or_else(|| common_keychain.to_string()),
        })
    }
}

pub type TestCoordinator<F = FrostDkgFactory> =
    KeyGenCoordinator<F, FakeBitgo, InMemoryKeychainStore>;

/// Coordinator wired to `bitgo` and a fresh in-memory store
pub fn coordinator(
    bitgo: Arc<FakeBitgo>,
) -> (TestCoordinator, Arc<InMemoryKeychainStore>) {
    coordinator_with_factory(FrostDkgFactory, bitgo)
}

pub fn coordinator_with_factory<F: tessera_core::DkgEngineFactory>(
    factory: F,
    bitgo: Arc<FakeBitgo>,
) -> (TestCoordinator<F>, Arc<InMemoryKeychainStore>) {
    let store = Arc::new(InMemoryKeychainStore::new());
    let trust = bitgo.trust_settings();
    (
        KeyGenCoordinator::new(factory, bitgo, store.clone(), trust),
        store,
    )
}
