//! BitGo's side of the key generation exchange
//!
//! All three rounds go to a single endpoint, distinguished by the `round`
//! tag and scoped by enterprise and protocol type.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::{AuthEncMessage, Result};
use tracing::instrument;

use crate::http::ApiClient;

/// Protocol `type` tag sent with every round
pub const PROTOCOL_TYPE: &str = "EDDSA_MPCv2";

const GENERATE_KEY_PATH: &str = "/api/v2/mpc/generatekey";

/// Round tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyGenRound {
    #[serde(rename = "MPCv2-R1")]
    R1,
    #[serde(rename = "MPCv2-R2")]
    R2,
    #[serde(rename = "MPCv2-R3")]
    R3,
}

/// Round 1: both local parties' envelope and ephemeral public keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round1Request {
    pub user_gpg_public_key: String,
    pub backup_gpg_public_key: String,
    pub user_pub_key: String,
    pub backup_pub_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeys {
    pub bitgo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round1Response {
    pub session_keys: SessionKeys,
    pub session_id: String,
}

/// Rounds 2 and 3: sealed messages for BitGo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRequest {
    pub session_id: String,
    pub payload: Vec<AuthEncMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round2Response {
    pub session_id: String,
    pub payload: Vec<AuthEncMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round3Response {
    pub session_id: String,
    pub payload: Vec<AuthEncMessage>,
    pub bitgo_common_keychain: String,
}

/// BitGo's envelope keys as served for an enterprise
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitgoPublicKeys {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default, rename = "mpcv2PublicKey")]
    pub mpcv2_public_key: Option<String>,
}

impl BitgoPublicKeys {
    /// The armored MPCv2 key, if one is served
    pub fn mpcv2(self) -> Option<String> {
        self.mpcv2_public_key.filter(|key| !key.trim().is_empty())
    }
}

/// Request envelope shared by all rounds
#[derive(Debug, Serialize)]
struct GenerateKeyRequest<'a, B> {
    enterprise: &'a str,
    #[serde(rename = "type")]
    protocol: &'static str,
    round: KeyGenRound,
    #[serde(flatten)]
    body: B,
}

#[derive(Debug, Serialize)]
struct Round1Body<'a> {
    payload: &'a Round1Request,
}

/// The remote party driving BitGo's DKG engine
#[async_trait]
pub trait RemoteCoordinator: Send + Sync {
    /// BitGo's MPCv2 envelope key for `enterprise`, if the service serves one
    async fn bitgo_public_key(&self, enterprise: &str) -> Result<Option<String>>;

    async fn round1(&self, enterprise: &str, request: Round1Request) -> Result<Round1Response>;

    async fn round2(&self, enterprise: &str, request: RoundRequest) -> Result<Round2Response>;

    async fn round3(&self, enterprise: &str, request: RoundRequest) -> Result<Round3Response>;
}

/// [`RemoteCoordinator`] over the BitGo REST API
#[derive(Debug, Clone)]
pub struct HttpRemoteCoordinator {
    api: ApiClient,
    coin: String,
}

impl HttpRemoteCoordinator {
    pub fn new(base_url: &str, coin: &str, access_token: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, access_token, timeout)?,
            coin: coin.to_string(),
        })
    }
}

#[async_trait]
impl RemoteCoordinator for HttpRemoteCoordinator {
    #[instrument(skip(self))]
    async fn bitgo_public_key(&self, enterprise: &str) -> Result<Option<String>> {
        let path = format!("/api/v2/{}/tss/pubkey", self.coin);
        let keys: BitgoPublicKeys = self
            .api
            .get_json(&path, &[("enterpriseId", enterprise)])
            .await?;
        Ok(keys.mpcv2())
    }

    #[instrument(skip(self, request))]
    async fn round1(&self, enterprise: &str, request: Round1Request) -> Result<Round1Response> {
        let body = GenerateKeyRequest {
            enterprise,
            protocol: PROTOCOL_TYPE,
            round: KeyGenRound::R1,
            body: Round1Body { payload: &request },
        };
        self.api.post_json(GENERATE_KEY_PATH, &body).await
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn round2(&self, enterprise: &str, request: RoundRequest) -> Result<Round2Response> {
        let body = GenerateKeyRequest {
            enterprise,
            protocol: PROTOCOL_TYPE,
            round: KeyGenRound::R2,
            body: &request,
        };
        self.api.post_json(GENERATE_KEY_PATH, &body).await
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn round3(&self, enterprise: &str, request: RoundRequest) -> Result<Round3Response> {
        let body = GenerateKeyRequest {
            enterprise,
            protocol: PROTOCOL_TYPE,
            round: KeyGenRound::R3,
            body: &request,
        };
        self.api.post_json(GENERATE_KEY_PATH, &body).await
    }
}
