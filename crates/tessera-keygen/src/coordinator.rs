//! Three-round key generation between the local User and Backup parties and
//! BitGo
//!
//! ```text
//! Init ─► R1Sent ─► R1Ok ─► R2Sent ─► R2Ok ─► R3Sent ─► R3Ok ─► Finalized ─► Persisted
//!   └──────────────────────── any failure ─────────────────────────┴─► Aborted
//! ```
//!
//! A [`KeyGenRun`] owns the envelope keypairs and DKG engines of both local
//! parties and releases them once it reaches a terminal state. Each
//! transition performs the checks tied to it; nothing is written to the
//! keychain store before [`KeyGenRun::finalize`] succeeds.

use std::sync::Arc;

use tessera_core::{
    concat_public_keys, decrypt_and_verify, encrypt_and_auth, encrypt_private_material,
    AuthEncMessage, CommonKeychain, DkgEngine, DkgEngineFactory, EphemeralPublicKey, Environment,
    Error, GpgKeyPair, GpgPublicKey, KeyClass, KeyShare, PartyId, ProtocolMessage,
    ProtocolVersion, PubkeyTrustStore, Result, SessionId,
};
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::KeyGenConfig;
use crate::keychain::{AddKeychainRequest, KeychainRecord, KeychainStore};
use crate::remote::{
    RemoteCoordinator, Round1Request, Round1Response, Round2Response, Round3Response,
    RoundRequest,
};

/// Progress of one key generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenState {
    Init,
    R1Sent,
    R1Ok,
    R2Sent,
    R2Ok,
    R3Sent,
    R3Ok,
    Finalized,
    Persisted,
    Aborted,
}

impl KeyGenState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, KeyGenState::Persisted | KeyGenState::Aborted)
    }
}

/// Where BitGo's envelope key comes from
#[derive(Debug, Clone)]
pub struct TrustSettings {
    pub environment: Environment,
    pub key_class: KeyClass,
    /// Armored key overriding the pinned table
    pub bitgo_gpg_public_key: Option<String>,
}

impl From<&KeyGenConfig> for TrustSettings {
    fn from(config: &KeyGenConfig) -> Self {
        Self {
            environment: config.environment,
            key_class: config.key_class(),
            bitgo_gpg_public_key: config.bitgo_gpg_public_key.clone(),
        }
    }
}

/// Resolve BitGo's envelope key for this environment
///
/// The key BitGo serves wins over the configured one, which wins over the
/// pinned table. Environments that require pinning only accept a key that
/// is in the pinned table, wherever it came from.
pub fn resolve_bitgo_key(settings: &TrustSettings, served: Option<&str>) -> Result<GpgPublicKey> {
    let environment = settings.environment;

    let (armored, origin) = match (served, settings.bitgo_gpg_public_key.as_deref()) {
        (Some(served), _) => (served, "Served"),
        (None, Some(configured)) => (configured, "Configured"),
        (None, None) => (
            PubkeyTrustStore::lookup(environment, settings.key_class, ProtocolVersion::Mpcv2)?,
            "Bundled",
        ),
    };

    if environment.requires_pinned_keys()
        && !PubkeyTrustStore::is_pinned(environment, ProtocolVersion::Mpcv2, armored)
    {
        return Err(Error::SecurityViolation(format!(
            "{} BitGo key is not a pinned mpcv2 key for {}",
            origin, environment
        )));
    }
    debug!("Using {} BitGo key for {}", origin.to_lowercase(), environment);
    GpgPublicKey::from_armored(PartyId::Bitgo, armored)
}

/// Check an outbound round 2 or round 3 payload before it is sent
///
/// Requires a session id and exactly one message from each local party, all
/// addressed to BitGo.
pub fn validate_round_payload(session_id: &str, payload: &[AuthEncMessage]) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(Error::ProtocolInvariantViolation(
            "Session ID is required".to_string(),
        ));
    }

    for party in PartyId::LOCAL {
        let count = payload.iter().filter(|m| m.from == party).count();
        if count != 1 {
            return Err(Error::ProtocolInvariantViolation(format!(
                "Round payload must contain exactly one {} message, found {}",
                party, count
            )));
        }
    }

    if payload.len() != PartyId::LOCAL.len() {
        return Err(Error::ProtocolInvariantViolation(format!(
            "Round payload must contain only local party messages, found {}",
            payload.len()
        )));
    }
    if let Some(stray) = payload.iter().find(|m| m.to != PartyId::Bitgo) {
        return Err(Error::ProtocolInvariantViolation(format!(
            "Round payload message from {} is addressed to {}",
            stray.from, stray.to
        )));
    }
    Ok(())
}

/// Inputs of [`KeyGenCoordinator::generate_keychains`]
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GenerateKeychainsParams {
    /// Encrypts the User and Backup key shares
    pub passphrase: String,
    pub enterprise: String,
    /// Legacy wrapper carried onto the User and Backup records
    pub original_passcode_encryption_code: Option<String>,
}

impl GenerateKeychainsParams {
    fn validate(&self) -> Result<()> {
        if self.enterprise.trim().is_empty() {
            return Err(Error::Configuration("Enterprise id is required".to_string()));
        }
        if self.passphrase.is_empty() {
            return Err(Error::Configuration("Passphrase is required".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GenerateKeychainsParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateKeychainsParams")
            .field("passphrase", &"[REDACTED]")
            .field("enterprise", &self.enterprise)
            .finish()
    }
}

/// The three stored keychains of a successful run
#[derive(Debug, Clone)]
pub struct KeychainsTriplet {
    pub user: KeychainRecord,
    pub backup: KeychainRecord,
    pub bitgo: KeychainRecord,
}

/// Output of [`KeyGenRun::finalize`]
#[derive(Debug)]
pub struct FinalizedKeys {
    pub user_share: KeyShare,
    pub backup_share: KeyShare,
    pub common_keychain: CommonKeychain,
}

/// State of one key generation run
pub struct KeyGenRun<E: DkgEngine> {
    state: KeyGenState,
    bitgo_gpg: GpgPublicKey,

    /// User then Backup; emptied in a terminal state
    gpg_keys: Vec<GpgKeyPair>,
    user_engine: Option<E>,
    backup_engine: Option<E>,

    session_id: Option<SessionId>,
    bitgo_ephemeral: Option<EphemeralPublicKey>,

    /// Local round 1 messages, fed back to both engines in round 2
    first_messages: Vec<ProtocolMessage>,
    /// Round 2 output addressed to BitGo
    outbound: Vec<ProtocolMessage>,
    /// Round 2 output exchanged between User and Backup, never sent
    local_p2p: Vec<ProtocolMessage>,

    bitgo_common_keychain: Option<CommonKeychain>,
}

impl<E: DkgEngine> KeyGenRun<E> {
    /// Create both local parties' keypairs and engines
    pub fn start<F>(factory: &F, bitgo_gpg: GpgPublicKey) -> Result<Self>
    where
        F: DkgEngineFactory<Engine = E>,
    {
        let user_engine = factory.create(PartyId::User)?;
        let backup_engine = factory.create(PartyId::Backup)?;

        Ok(Self {
            state: KeyGenState::Init,
            bitgo_gpg,
            gpg_keys: vec![
                GpgKeyPair::generate(PartyId::User),
                GpgKeyPair::generate(PartyId::Backup),
            ],
            user_engine: Some(user_engine),
            backup_engine: Some(backup_engine),
            session_id: None,
            bitgo_ephemeral: None,
            first_messages: Vec::new(),
            outbound: Vec::new(),
            local_p2p: Vec::new(),
            bitgo_common_keychain: None,
        })
    }

    pub fn state(&self) -> KeyGenState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Whether the run still holds engines or envelope secrets
    pub fn holds_key_material(&self) -> bool {
        self.user_engine.is_some() || self.backup_engine.is_some() || !self.gpg_keys.is_empty()
    }

    fn transition(&mut self, next: KeyGenState) {
        info!("Key generation {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn expect_state(&self, expected: KeyGenState) -> Result<()> {
        if self.state != expected {
            return Err(Error::ProtocolInvariantViolation(format!(
                "Expected state {:?}, run is in {:?}",
                expected, self.state
            )));
        }
        Ok(())
    }

    /// Enter the terminal failure state, dropping key material and in-flight
    /// messages
    pub fn abort(&mut self, reason: &Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!("Key generation aborted in {:?}: {}", self.state, reason);
        self.release_key_material();
        self.state = KeyGenState::Aborted;
    }

    fn release_key_material(&mut self) {
        self.user_engine = None;
        self.backup_engine = None;
        self.gpg_keys.clear();
        self.first_messages.clear();
        self.outbound.clear();
        self.local_p2p.clear();
    }

    fn local_gpg_keys(&self) -> Result<(&GpgKeyPair, &GpgKeyPair)> {
        match self.gpg_keys.as_slice() {
            [user, backup] => Ok((user, backup)),
            _ => Err(key_material_released()),
        }
    }

    fn engines(&self) -> Result<(&E, &E)> {
        match (&self.user_engine, &self.backup_engine) {
            (Some(user), Some(backup)) => Ok((user, backup)),
            _ => Err(key_material_released()),
        }
    }

    /// Run `op` on both engines in parallel blocking tasks
    async fn on_engines<T, Op>(&mut self, op: Op) -> Result<(T, T)>
    where
        T: Send + 'static,
        Op: Fn(&mut E) -> Result<T> + Clone + Send + 'static,
    {
        let (user, backup) = match (self.user_engine.take(), self.backup_engine.take()) {
            (Some(user), Some(backup)) => (user, backup),
            _ => return Err(key_material_released()),
        };

        let spawn = |mut engine: E, op: Op| {
            tokio::task::spawn_blocking(move || {
                let out = op(&mut engine);
                (engine, out)
            })
        };
        let (user_task, backup_task) = tokio::join!(spawn(user, op.clone()), spawn(backup, op));
        let (user, user_out) = user_task.map_err(engine_task_failed)?;
        let (backup, backup_out) = backup_task.map_err(engine_task_failed)?;

        self.user_engine = Some(user);
        self.backup_engine = Some(backup);
        Ok((user_out?, backup_out?))
    }

    fn check_session(&self, returned: &str) -> Result<()> {
        let expected = self
            .session_id
            .as_ref()
            .ok_or_else(|| Error::ProtocolInvariantViolation("No session id".to_string()))?;
        if returned != expected.as_str() {
            return Err(Error::ProtocolInvariantViolation(format!(
                "Session ID mismatch: expected {}, got {}",
                expected, returned
            )));
        }
        Ok(())
    }

    fn seal_for_bitgo(&self, messages: &[ProtocolMessage]) -> Result<RoundRequest> {
        let session_id = self
            .session_id
            .as_ref()
            .ok_or_else(|| Error::ProtocolInvariantViolation("No session id".to_string()))?;

        let payload = encrypt_and_auth(messages, &self.gpg_keys, &self.bitgo_gpg)?;
        validate_round_payload(session_id.as_str(), &payload)?;

        Ok(RoundRequest {
            session_id: session_id.to_string(),
            payload,
        })
    }

    /// Open a BitGo response; only BitGo's key is trusted
    fn open_from_bitgo(&self, payload: &[AuthEncMessage]) -> Result<Vec<ProtocolMessage>> {
        decrypt_and_verify(
            payload,
            std::slice::from_ref(&self.bitgo_gpg),
            &self.gpg_keys,
        )
    }

    /// Feed one round to both engines
    async fn feed_engines(
        &mut self,
        inbound: Vec<ProtocolMessage>,
    ) -> Result<(Vec<ProtocolMessage>, Vec<ProtocolMessage>)> {
        let inbound = Arc::new(inbound);
        self.on_engines(move |engine: &mut E| engine.handle_incoming_messages(&inbound))
            .await
    }

    /// Build the round 1 request
    pub fn round1_request(&mut self) -> Result<Round1Request> {
        self.expect_state(KeyGenState::Init)?;

        let (user_gpg, backup_gpg) = self.local_gpg_keys()?;
        let (user_engine, backup_engine) = self.engines()?;
        let request = Round1Request {
            user_gpg_public_key: user_gpg.armored_public_key(),
            backup_gpg_public_key: backup_gpg.armored_public_key(),
            user_pub_key: user_engine.public_key()?.to_base64(),
            backup_pub_key: backup_engine.public_key()?.to_base64(),
        };

        for (name, value) in [
            ("userGpgPublicKey", &request.user_gpg_public_key),
            ("backupGpgPublicKey", &request.backup_gpg_public_key),
            ("userPubKey", &request.user_pub_key),
            ("backupPubKey", &request.backup_pub_key),
        ] {
            if value.is_empty() {
                return Err(Error::ProtocolInvariantViolation(format!(
                    "Round 1 {} is empty",
                    name
                )));
            }
        }

        self.transition(KeyGenState::R1Sent);
        Ok(request)
    }

    /// Record BitGo's ephemeral key and the session id
    pub fn accept_round1(&mut self, response: Round1Response) -> Result<()> {
        self.expect_state(KeyGenState::R1Sent)?;

        let session_id = SessionId::new(response.session_id)?;
        let bitgo_ephemeral =
            EphemeralPublicKey::from_base64(PartyId::Bitgo, &response.session_keys.bitgo)?;

        debug!("Session {} opened", session_id);
        self.session_id = Some(session_id);
        self.bitgo_ephemeral = Some(bitgo_ephemeral);
        self.transition(KeyGenState::R1Ok);
        Ok(())
    }

    /// Initialize both engines and seal their first messages for BitGo
    pub async fn round2_request(&mut self) -> Result<RoundRequest> {
        self.expect_state(KeyGenState::R1Ok)?;

        let bitgo_ephemeral = self
            .bitgo_ephemeral
            .clone()
            .ok_or_else(|| Error::ProtocolInvariantViolation("No BitGo public key".to_string()))?;
        let (user_engine, backup_engine) = self.engines()?;
        let keys = [
            user_engine.public_key()?,
            backup_engine.public_key()?,
            bitgo_ephemeral,
        ];
        let concatenated = Arc::new(concat_public_keys(&keys)?);

        let (user_first, backup_first) = self
            .on_engines(move |engine: &mut E| {
                engine.init_dkg(&concatenated)?;
                engine.first_message()
            })
            .await?;
        self.first_messages = vec![user_first, backup_first];

        let request = self.seal_for_bitgo(&self.first_messages)?;
        self.transition(KeyGenState::R2Sent);
        Ok(request)
    }

    /// Verify BitGo's first message and produce both engines' second messages
    pub async fn accept_round2(&mut self, response: Round2Response) -> Result<()> {
        self.expect_state(KeyGenState::R2Sent)?;
        self.check_session(&response.session_id)?;

        let opened = self.open_from_bitgo(&response.payload)?;
        let bitgo_first = single_bitgo_message(&opened, None)?;

        let mut inbound = self.first_messages.clone();
        inbound.push(bitgo_first);
        let (user_out, backup_out) = self.feed_engines(inbound).await?;

        let (outbound, local_p2p): (Vec<_>, Vec<_>) = user_out
            .into_iter()
            .chain(backup_out)
            .partition(|m| m.to == Some(PartyId::Bitgo));
        self.outbound = outbound;
        self.local_p2p = local_p2p;
        self.first_messages.clear();

        self.transition(KeyGenState::R2Ok);
        Ok(())
    }

    /// Seal both engines' second messages for BitGo
    pub fn round3_request(&mut self) -> Result<RoundRequest> {
        self.expect_state(KeyGenState::R2Ok)?;

        let request = self.seal_for_bitgo(&self.outbound)?;
        self.outbound.clear();
        self.transition(KeyGenState::R3Sent);
        Ok(request)
    }

    /// Verify BitGo's second messages and complete both engines
    pub async fn accept_round3(&mut self, response: Round3Response) -> Result<()> {
        self.expect_state(KeyGenState::R3Sent)?;
        self.check_session(&response.session_id)?;

        let bitgo_common_keychain = CommonKeychain::from_reported(response.bitgo_common_keychain)?;
        let opened = self.open_from_bitgo(&response.payload)?;

        let mut inbound = std::mem::take(&mut self.local_p2p);
        for party in PartyId::LOCAL {
            inbound.push(single_bitgo_message(&opened, Some(party))?);
        }

        let (user_out, backup_out) = self.feed_engines(inbound).await?;
        if !user_out.is_empty() || !backup_out.is_empty() {
            return Err(Error::ProtocolInvariantViolation(
                "Engines produced messages after the final round".to_string(),
            ));
        }

        self.bitgo_common_keychain = Some(bitgo_common_keychain);
        self.transition(KeyGenState::R3Ok);
        Ok(())
    }

    /// Extract both key shares and check all three parties derived one key
    pub fn finalize(&mut self) -> Result<FinalizedKeys> {
        self.expect_state(KeyGenState::R3Ok)?;

        let (user_engine, backup_engine) = self.engines()?;
        let user_share = user_engine.key_share()?;
        let backup_share = backup_engine.key_share()?;
        let user_keychain = E::common_keychain(&user_share)?;
        let backup_keychain = E::common_keychain(&backup_share)?;

        let bitgo_keychain = self.bitgo_common_keychain.take().ok_or_else(|| {
            Error::ProtocolInvariantViolation("No BitGo common keychain".to_string())
        })?;

        if user_keychain != bitgo_keychain {
            return Err(Error::ProtocolInvariantViolation(
                "User and BitGo common keychains do not match".to_string(),
            ));
        }
        if backup_keychain != bitgo_keychain {
            return Err(Error::ProtocolInvariantViolation(
                "Backup and BitGo common keychains do not match".to_string(),
            ));
        }

        self.transition(KeyGenState::Finalized);
        Ok(FinalizedKeys {
            user_share,
            backup_share,
            common_keychain: bitgo_keychain,
        })
    }

    /// Record that all three keychains were stored and drop the local secrets
    pub fn mark_persisted(&mut self) -> Result<()> {
        self.expect_state(KeyGenState::Finalized)?;
        self.release_key_material();
        self.transition(KeyGenState::Persisted);
        Ok(())
    }
}

fn key_material_released() -> Error {
    Error::ProtocolInvariantViolation("Run no longer holds its key material".to_string())
}

fn engine_task_failed(e: tokio::task::JoinError) -> Error {
    Error::Engine(format!("Engine task failed: {}", e))
}

/// BitGo's message for `to` (`None` for its broadcast)
///
/// A broadcast arrives once per local recipient; all copies must agree.
fn single_bitgo_message(
    opened: &[ProtocolMessage],
    to: Option<PartyId>,
) -> Result<ProtocolMessage> {
    let mut matching = opened
        .iter()
        .filter(|m| m.from == PartyId::Bitgo && m.to == to);

    let label = to.map_or("broadcast".to_string(), |p| format!("{} message", p));
    let first = matching.next().ok_or_else(|| {
        Error::ProtocolInvariantViolation(format!("BitGo {} missing from response", label))
    })?;
    if matching.any(|m| m != first) {
        return Err(Error::ProtocolInvariantViolation(format!(
            "BitGo sent conflicting {} messages",
            label
        )));
    }
    Ok(first.clone())
}

/// Drives key generation runs against BitGo and a keychain store
pub struct KeyGenCoordinator<F, R, K> {
    factory: F,
    remote: Arc<R>,
    store: Arc<K>,
    trust: TrustSettings,
}

impl<F, R, K> KeyGenCoordinator<F, R, K>
where
    F: DkgEngineFactory,
    R: RemoteCoordinator,
    K: KeychainStore,
{
    pub fn new(factory: F, remote: Arc<R>, store: Arc<K>, trust: TrustSettings) -> Self {
        Self {
            factory,
            remote,
            store,
            trust,
        }
    }

    /// Run all three rounds and persist the User, Backup and BitGo keychains
    pub async fn generate_keychains(
        &self,
        params: GenerateKeychainsParams,
    ) -> Result<KeychainsTriplet> {
        params.validate()?;
        let mut run = self.new_run(&params.enterprise).await?;
        self.execute(&mut run, &params).await
    }

    /// Prepare a run after resolving BitGo's envelope key for `enterprise`
    pub async fn new_run(&self, enterprise: &str) -> Result<KeyGenRun<F::Engine>> {
        let served = self.remote.bitgo_public_key(enterprise).await?;
        let bitgo_gpg = resolve_bitgo_key(&self.trust, served.as_deref())?;
        KeyGenRun::start(&self.factory, bitgo_gpg)
    }

    /// Drive `run` to completion, aborting it on the first failure
    #[instrument(skip(self, run, params), fields(enterprise = %params.enterprise))]
    pub async fn execute(
        &self,
        run: &mut KeyGenRun<F::Engine>,
        params: &GenerateKeychainsParams,
    ) -> Result<KeychainsTriplet> {
        match self.drive(run, params).await {
            Ok(triplet) => Ok(triplet),
            Err(e) => {
                run.abort(&e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut KeyGenRun<F::Engine>,
        params: &GenerateKeychainsParams,
    ) -> Result<KeychainsTriplet> {
        params.validate()?;
        let enterprise = params.enterprise.as_str();

        let request = run.round1_request()?;
        let response = self.remote.round1(enterprise, request).await?;
        run.accept_round1(response)?;

        let request = run.round2_request().await?;
        let response = self.remote.round2(enterprise, request).await?;
        run.accept_round2(response).await?;

        let request = run.round3_request()?;
        let response = self.remote.round3(enterprise, request).await?;
        run.accept_round3(response).await?;

        let keys = run.finalize()?;
        let triplet = self.persist(keys, params).await?;
        run.mark_persisted()?;

        info!("Generated keychain {}", triplet.bitgo.common_keychain);
        Ok(triplet)
    }

    async fn persist(
        &self,
        keys: FinalizedKeys,
        params: &GenerateKeychainsParams,
    ) -> Result<KeychainsTriplet> {
        let encrypt = |share: KeyShare| {
            let params = params.clone();
            tokio::task::spawn_blocking(move || {
                encrypt_private_material(&share, &params.passphrase)
            })
        };

        let FinalizedKeys {
            user_share,
            backup_share,
            common_keychain,
        } = keys;
        let (user_prv, backup_prv) = tokio::try_join!(encrypt(user_share), encrypt(backup_share))
            .map_err(|e| Error::Crypto(format!("Encryption task failed: {}", e)))?;

        let legacy = params.original_passcode_encryption_code.clone();
        let user = AddKeychainRequest::participant(
            PartyId::User,
            common_keychain.clone(),
            Some(user_prv?),
            legacy.clone(),
        );
        let backup = AddKeychainRequest::participant(
            PartyId::Backup,
            common_keychain.clone(),
            Some(backup_prv?),
            legacy,
        );
        let bitgo = AddKeychainRequest::participant(PartyId::Bitgo, common_keychain, None, None);

        for request in [&user, &backup, &bitgo] {
            request.validate()?;
        }

        let (user, backup, bitgo) = tokio::try_join!(
            self.store.add(user),
            self.store.add(backup),
            self.store.add(bitgo),
        )?;

        Ok(KeychainsTriplet {
            user,
            backup,
            bitgo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(from: PartyId, to: PartyId) -> AuthEncMessage {
        AuthEncMessage {
            from,
            to,
            ciphertext: vec![1],
            signature: vec![2],
        }
    }

    #[test]
    fn test_payload_with_both_parties() {
        let payload = vec![
            sealed(PartyId::User, PartyId::Bitgo),
            sealed(PartyId::Backup, PartyId::Bitgo),
        ];
        assert!(validate_round_payload("session", &payload).is_ok());
    }

    #[test]
    fn test_payload_missing_backup() {
        let payload = vec![sealed(PartyId::User, PartyId::Bitgo)];
        let err = validate_round_payload("session", &payload).unwrap_err();
        assert!(matches!(err, Error::ProtocolInvariantViolation(_)));
    }

    #[test]
    fn test_payload_duplicate_user() {
        let payload = vec![
            sealed(PartyId::User, PartyId::Bitgo),
            sealed(PartyId::User, PartyId::Bitgo),
            sealed(PartyId::Backup, PartyId::Bitgo),
        ];
        assert!(validate_round_payload("session", &payload).is_err());
    }

    #[test]
    fn test_payload_requires_session() {
        let payload = vec![
            sealed(PartyId::User, PartyId::Bitgo),
            sealed(PartyId::Backup, PartyId::Bitgo),
        ];
        assert!(validate_round_payload(" ", &payload).is_err());
    }

    #[test]
    fn test_payload_rejects_stray_messages() {
        let payload = vec![
            sealed(PartyId::User, PartyId::Bitgo),
            sealed(PartyId::Backup, PartyId::Bitgo),
            sealed(PartyId::Bitgo, PartyId::User),
        ];
        assert!(validate_round_payload("session", &payload).is_err());

        let payload = vec![
            sealed(PartyId::User, PartyId::Backup),
            sealed(PartyId::Backup, PartyId::Bitgo),
        ];
        assert!(validate_round_payload("session", &payload).is_err());
    }

    #[test]
    fn test_resolve_pinned_key() {
        let settings = TrustSettings {
            environment: Environment::Prod,
            key_class: KeyClass::Onprem,
            bitgo_gpg_public_key: None,
        };
        let key = resolve_bitgo_key(&settings, None).unwrap();
        assert_eq!(key.party(), PartyId::Bitgo);
    }

    #[test]
    fn test_resolve_unprovisioned_key_fails() {
        let settings = TrustSettings {
            environment: Environment::AdminProd,
            key_class: KeyClass::Nitro,
            bitgo_gpg_public_key: None,
        };
        assert!(matches!(
            resolve_bitgo_key(&settings, None),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_pinned_environment_rejects_unpinned_override() {
        let rogue = GpgKeyPair::generate(PartyId::Bitgo).armored_public_key();
        let settings = TrustSettings {
            environment: Environment::Staging,
            key_class: KeyClass::Onprem,
            bitgo_gpg_public_key: Some(rogue.clone()),
        };
        assert!(matches!(
            resolve_bitgo_key(&settings, None),
            Err(Error::SecurityViolation(_))
        ));

        let settings = TrustSettings {
            environment: Environment::Dev,
            ..settings
        };
        assert!(resolve_bitgo_key(&settings, None).is_ok());
    }

    #[test]
    fn test_served_key_must_be_pinned() {
        let served = GpgKeyPair::generate(PartyId::Bitgo).armored_public_key();
        let settings = TrustSettings {
            environment: Environment::Prod,
            key_class: KeyClass::Onprem,
            bitgo_gpg_public_key: None,
        };
        assert!(matches!(
            resolve_bitgo_key(&settings, Some(&served)),
            Err(Error::SecurityViolation(_))
        ));

        let pinned =
            PubkeyTrustStore::lookup(Environment::Prod, KeyClass::Onprem, ProtocolVersion::Mpcv2)
                .unwrap();
        assert!(resolve_bitgo_key(&settings, Some(pinned)).is_ok());
    }

    #[test]
    fn test_served_key_wins_over_configured() {
        let served = GpgKeyPair::generate(PartyId::Bitgo);
        let configured = GpgKeyPair::generate(PartyId::Bitgo);
        let settings = TrustSettings {
            environment: Environment::Local,
            key_class: KeyClass::Onprem,
            bitgo_gpg_public_key: Some(configured.armored_public_key()),
        };

        let key = resolve_bitgo_key(&settings, Some(&served.armored_public_key())).unwrap();
        assert_eq!(key, served.public_key());

        let key = resolve_bitgo_key(&settings, None).unwrap();
        assert_eq!(key, configured.public_key());
    }

    #[test]
    fn test_params_require_enterprise_and_passphrase() {
        let params = GenerateKeychainsParams {
            passphrase: String::new(),
            enterprise: "ent".to_string(),
            original_passcode_encryption_code: None,
        };
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));

        let params = GenerateKeychainsParams {
            passphrase: "pass".to_string(),
            enterprise: " ".to_string(),
            original_passcode_encryption_code: None,
        };
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_conflicting_bitgo_broadcasts() {
        let opened = vec![
            ProtocolMessage::broadcast(PartyId::Bitgo, vec![1]),
            ProtocolMessage::broadcast(PartyId::Bitgo, vec![2]),
        ];
        assert!(single_bitgo_message(&opened, None).is_err());

        let opened = vec![
            ProtocolMessage::broadcast(PartyId::Bitgo, vec![1]),
            ProtocolMessage::broadcast(PartyId::Bitgo, vec![1]),
        ];
        assert_eq!(single_bitgo_message(&opened, None).unwrap().payload, vec![1]);
    }

    #[test]
    fn test_missing_bitgo_direct_message() {
        let opened = vec![ProtocolMessage::p2p(PartyId::Bitgo, PartyId::User, vec![1])];
        assert!(single_bitgo_message(&opened, Some(PartyId::User)).is_ok());
        assert!(single_bitgo_message(&opened, Some(PartyId::Backup)).is_err());
    }

    #[test]
    fn test_params_debug_is_redacted() {
        let params = GenerateKeychainsParams {
            passphrase: "hunter2".to_string(),
            enterprise: "ent".to_string(),
            original_passcode_encryption_code: None,
        };
        assert!(!format!("{:?}", params).contains("hunter2"));
    }
}
