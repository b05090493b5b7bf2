//! Key generation configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tessera_core::{Environment, Error, KeyClass, Result};

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "TESSERA_CONFIG";

/// Key generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGenConfig {
    /// Deployment environment, selects the pinned BitGo key set
    pub environment: Environment,

    /// BitGo key class (`nitro` or `onprem`); unknown values mean `onprem`
    pub key_class: String,

    /// Armored BitGo envelope key, overriding the pinned key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitgo_gpg_public_key: Option<String>,

    /// Base URL of the BitGo API
    pub api_base_url: String,

    /// Name of the environment variable holding the API access token
    pub access_token_env: String,

    /// Coin whose keychain endpoint stores the records
    pub coin: String,

    /// Timeout for each HTTP request (seconds)
    pub request_timeout_secs: u64,
}

impl Default for KeyGenConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Test,
            key_class: KeyClass::Onprem.as_str().to_string(),
            bitgo_gpg_public_key: None,
            api_base_url: "https://app.bitgo-test.com".to_string(),
            access_token_env: "BITGO_ACCESS_TOKEN".to_string(),
            coin: "tsol".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl KeyGenConfig {
    /// `$TESSERA_CONFIG`, else `<config dir>/tessera/keygen.json`
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tessera")
                    .join("keygen.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Configuration(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            Error::Configuration(format!("Cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    pub fn key_class(&self) -> KeyClass {
        KeyClass::parse(&self.key_class)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API access token from the configured variable
    pub fn access_token(&self) -> Result<String> {
        match std::env::var(&self.access_token_env) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::Configuration(format!(
                "{} is not set",
                self.access_token_env
            ))),
        }
    }
}
