//! Keychain persistence

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::{CommonKeychain, Error, PartyId, Result, KEY_TYPE_TSS};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::http::ApiClient;

/// Keychain creation request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKeychainRequest {
    #[serde(with = "source_label")]
    pub source: PartyId,
    pub key_type: String,
    pub common_keychain: CommonKeychain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_prv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_passcode_encryption_code: Option<String>,
    #[serde(rename = "isMPCv2")]
    pub is_mpcv2: bool,
}

impl AddKeychainRequest {
    /// Request for one participant's threshold keychain
    pub fn participant(
        source: PartyId,
        common_keychain: CommonKeychain,
        encrypted_prv: Option<String>,
        original_passcode_encryption_code: Option<String>,
    ) -> Self {
        Self {
            source,
            key_type: KEY_TYPE_TSS.to_string(),
            common_keychain,
            encrypted_prv,
            original_passcode_encryption_code,
            is_mpcv2: true,
        }
    }

    /// User and Backup must carry encrypted private material; BitGo never does
    pub fn validate(&self) -> Result<()> {
        let has_prv = self
            .encrypted_prv
            .as_deref()
            .is_some_and(|prv| !prv.is_empty());

        if self.source.holds_private_material() && !has_prv {
            return Err(Error::InvalidKeychain(format!(
                "{} keychain requires encrypted private material",
                self.source
            )));
        }
        if !self.source.holds_private_material() && self.encrypted_prv.is_some() {
            return Err(Error::InvalidKeychain(format!(
                "{} keychain must not carry private material",
                self.source
            )));
        }
        if self.common_keychain.as_str().is_empty() {
            return Err(Error::InvalidKeychain(
                "Common keychain is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AddKeychainRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddKeychainRequest")
            .field("source", &self.source)
            .field("common_keychain", &self.common_keychain)
            .field("has_encrypted_prv", &self.encrypted_prv.is_some())
            .finish()
    }
}

/// A stored keychain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeychainRecord {
    pub id: String,
    #[serde(with = "source_label")]
    pub source: PartyId,
    #[serde(rename = "type", default = "default_key_type")]
    pub key_type: String,
    pub common_keychain: CommonKeychain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_prv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_passcode_encryption_code: Option<String>,
    #[serde(rename = "isMPCv2", default)]
    pub is_mpcv2: bool,
}

fn default_key_type() -> String {
    KEY_TYPE_TSS.to_string()
}

/// Where finished keychains are written
#[async_trait]
pub trait KeychainStore: Send + Sync {
    async fn add(&self, request: AddKeychainRequest) -> Result<KeychainRecord>;
}

/// [`KeychainStore`] over the BitGo REST API
#[derive(Debug, Clone)]
pub struct HttpKeychainStore {
    api: ApiClient,
    coin: String,
}

impl HttpKeychainStore {
    pub fn new(base_url: &str, coin: &str, access_token: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, access_token, timeout)?,
            coin: coin.to_string(),
        })
    }
}

#[async_trait]
impl KeychainStore for HttpKeychainStore {
    #[instrument(skip(self, request), fields(source = %request.source))]
    async fn add(&self, request: AddKeychainRequest) -> Result<KeychainRecord> {
        request.validate()?;
        let path = format!("/api/v2/{}/key", self.coin);
        self.api.post_json(&path, &request).await
    }
}

/// Process-local [`KeychainStore`]
#[derive(Debug, Default)]
pub struct InMemoryKeychainStore {
    records: RwLock<Vec<KeychainRecord>>,
}

impl InMemoryKeychainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far
    pub async fn records(&self) -> Vec<KeychainRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl KeychainStore for InMemoryKeychainStore {
    async fn add(&self, request: AddKeychainRequest) -> Result<KeychainRecord> {
        request.validate()?;

        let record = KeychainRecord {
            id: uuid::Uuid::new_v4().to_string(),
            source: request.source,
            key_type: request.key_type,
            common_keychain: request.common_keychain,
            encrypted_prv: request.encrypted_prv,
            original_passcode_encryption_code: request.original_passcode_encryption_code,
            is_mpcv2: request.is_mpcv2,
        };

        self.records.write().await.push(record.clone());
        debug!("Stored {} keychain {}", record.source, record.id);
        Ok(record)
    }
}

/// Serde helper carrying a [`PartyId`] as its keychain source label
mod source_label {
    use serde::{Deserialize, Deserializer, Serializer};
    use tessera_core::PartyId;

    pub fn serialize<S>(party: &PartyId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(party.source())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PartyId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PartyId::ALL
            .into_iter()
            .find(|p| p.source() == s)
            .ok_or_else(|| serde::de::Error::custom(format!("Unknown keychain source: {}", s)))
    }
}
