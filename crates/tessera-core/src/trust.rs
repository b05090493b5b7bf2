//! Pinned BitGo envelope public keys
//!
//! Key generation in a production-like environment only ever trusts BitGo
//! keys that are compiled into this table. Non-production environments share
//! the `test` key set; `admin*` environments share their non-admin
//! counterpart's keys.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::envelope::GpgPublicKey;
use crate::error::{Error, Result};
use crate::types::PartyId;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    Prod,
    Test,
    Staging,
    Dev,
    Latest,
    Local,
    Mock,
    AdminProd,
    AdminTest,
    AdminStaging,
    AdminDev,
    AdminLatest,
}

impl Environment {
    pub const ALL: [Environment; 12] = [
        Environment::Prod,
        Environment::Test,
        Environment::Staging,
        Environment::Dev,
        Environment::Latest,
        Environment::Local,
        Environment::Mock,
        Environment::AdminProd,
        Environment::AdminTest,
        Environment::AdminStaging,
        Environment::AdminDev,
        Environment::AdminLatest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
            Environment::Latest => "latest",
            Environment::Local => "local",
            Environment::Mock => "mock",
            Environment::AdminProd => "adminProd",
            Environment::AdminTest => "adminTest",
            Environment::AdminStaging => "adminStaging",
            Environment::AdminDev => "adminDev",
            Environment::AdminLatest => "adminLatest",
        }
    }

    /// Strip the admin prefix
    pub fn base(&self) -> Environment {
        match self {
            Environment::AdminProd => Environment::Prod,
            Environment::AdminTest => Environment::Test,
            Environment::AdminStaging => Environment::Staging,
            Environment::AdminDev => Environment::Dev,
            Environment::AdminLatest => Environment::Latest,
            other => *other,
        }
    }

    /// Key set this environment resolves to
    pub fn key_set(&self) -> KeySet {
        match self.base() {
            Environment::Prod => KeySet::Prod,
            _ => KeySet::Test,
        }
    }

    /// Whether a configured BitGo key must be one of the pinned keys
    pub fn requires_pinned_keys(&self) -> bool {
        matches!(
            self.base(),
            Environment::Prod | Environment::Test | Environment::Staging
        )
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("Unknown environment: {}", s)))
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(env: Environment) -> String {
        env.as_str().to_string()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pinned table an environment draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySet {
    Prod,
    Test,
}

/// Where BitGo's key material is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    Nitro,
    #[default]
    Onprem,
}

impl KeyClass {
    pub const ALL: [KeyClass; 2] = [KeyClass::Nitro, KeyClass::Onprem];

    /// Lenient parse: anything other than `nitro` is on-prem
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("nitro") {
            KeyClass::Nitro
        } else {
            KeyClass::Onprem
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Nitro => "nitro",
            KeyClass::Onprem => "onprem",
        }
    }
}

impl std::fmt::Display for KeyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MPC protocol generation the key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    Mpcv1,
    Mpcv2,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 2] = [ProtocolVersion::Mpcv1, ProtocolVersion::Mpcv2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Mpcv1 => "mpcv1",
            ProtocolVersion::Mpcv2 => "mpcv2",
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mpcv1" => Ok(ProtocolVersion::Mpcv1),
            "mpcv2" => Ok(ProtocolVersion::Mpcv2),
            other => Err(Error::Configuration(format!(
                "Unknown protocol version: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PROD_NITRO_MPCV1: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
A7bCZ6v+lPxHT4KSrrFNVunK9fJAzgaTwVicZLaNx8C2
-----END TESSERA PUBLIC KEY BLOCK-----
";

const PROD_ONPREM_MPCV1: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
AlRfxstNci/utXM8wE3nyvWB9iD9d17sL0DBm3HWR9nl
-----END TESSERA PUBLIC KEY BLOCK-----
";

const PROD_ONPREM_MPCV2: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
A7z8bTiUR5iSiOB6wu+6AGJaVb1sA2JhkLcZlVgrDbQC
-----END TESSERA PUBLIC KEY BLOCK-----
";

const TEST_NITRO_MPCV1: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
A9jCFrK6WIYOX24yT1fk3scMQRQdmAZXT54M2kem1JSL
-----END TESSERA PUBLIC KEY BLOCK-----
";

const TEST_NITRO_MPCV2: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
A5AAXtMI5laLjpekyT+t/y6Kfr890Gd4Fum9UazslHeQ
-----END TESSERA PUBLIC KEY BLOCK-----
";

const TEST_ONPREM_MPCV1: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
AvQmy2jVzmItIp5AGuQmbXyw2pWOljWRoSKZ+3Y2X2n4
-----END TESSERA PUBLIC KEY BLOCK-----
";

const TEST_ONPREM_MPCV2: &str = "-----BEGIN TESSERA PUBLIC KEY BLOCK-----
AoD2hOh8OyE4lXa7FDDcW3ahYMaNLXW33pMn5SW9EdqK
-----END TESSERA PUBLIC KEY BLOCK-----
";

/// Compile-time table of pinned BitGo keys
pub struct PubkeyTrustStore;

impl PubkeyTrustStore {
    fn entry(set: KeySet, class: KeyClass, version: ProtocolVersion) -> Option<&'static str> {
        use KeyClass::*;
        use ProtocolVersion::*;

        match (set, class, version) {
            (KeySet::Prod, Nitro, Mpcv1) => Some(PROD_NITRO_MPCV1),
            (KeySet::Prod, Nitro, Mpcv2) => None,
            (KeySet::Prod, Onprem, Mpcv1) => Some(PROD_ONPREM_MPCV1),
            (KeySet::Prod, Onprem, Mpcv2) => Some(PROD_ONPREM_MPCV2),
            (KeySet::Test, Nitro, Mpcv1) => Some(TEST_NITRO_MPCV1),
            (KeySet::Test, Nitro, Mpcv2) => Some(TEST_NITRO_MPCV2),
            (KeySet::Test, Onprem, Mpcv1) => Some(TEST_ONPREM_MPCV1),
            (KeySet::Test, Onprem, Mpcv2) => Some(TEST_ONPREM_MPCV2),
        }
    }

    /// Armored BitGo key pinned for this combination
    pub fn lookup(
        environment: Environment,
        key_class: KeyClass,
        version: ProtocolVersion,
    ) -> Result<&'static str> {
        Self::entry(environment.key_set(), key_class, version).ok_or_else(|| {
            Error::Configuration(format!(
                "No {} {} key provisioned for {}",
                key_class, version, environment
            ))
        })
    }

    /// Every key pinned for an environment's key set, across key classes
    pub fn pinned_keys(
        environment: Environment,
        version: ProtocolVersion,
    ) -> impl Iterator<Item = &'static str> {
        let set = environment.key_set();
        KeyClass::ALL
            .into_iter()
            .filter_map(move |class| Self::entry(set, class, version))
    }

    /// Whether `armored` decodes to one of the keys pinned for `environment`
    pub fn is_pinned(environment: Environment, version: ProtocolVersion, armored: &str) -> bool {
        let Ok(candidate) = GpgPublicKey::from_armored(PartyId::Bitgo, armored) else {
            return false;
        };
        Self::pinned_keys(environment, version).any(|pinned| {
            GpgPublicKey::from_armored(PartyId::Bitgo, pinned)
                .map(|key| key == candidate)
                .unwrap_or(false)
        })
    }

    /// Parse every provisioned key, returning how many were checked
    pub fn validate() -> Result<usize> {
        let mut checked = 0;
        for set in [KeySet::Prod, KeySet::Test] {
            for class in KeyClass::ALL {
                for version in ProtocolVersion::ALL {
                    if let Some(armored) = Self::entry(set, class, version) {
                        GpgPublicKey::from_armored(PartyId::Bitgo, armored).map_err(|e| {
                            Error::Configuration(format!(
                                "Pinned {:?} {} {} key is invalid: {}",
                                set, class, version, e
                            ))
                        })?;
                        checked += 1;
                    }
                }
            }
        }
        Ok(checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::GpgKeyPair;

    #[test]
    fn test_environment_round_trip() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert!(matches!(
            "production".parse::<Environment>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_environment_serde_uses_wire_name() {
        let json = serde_json::to_string(&Environment::AdminStaging).unwrap();
        assert_eq!(json, "\"adminStaging\"");
        assert!(serde_json::from_str::<Environment>("\"nope\"").is_err());
    }

    #[test]
    fn test_admin_environments_share_keys() {
        for version in ProtocolVersion::ALL {
            assert_eq!(
                PubkeyTrustStore::lookup(Environment::AdminTest, KeyClass::Onprem, version)
                    .unwrap(),
                PubkeyTrustStore::lookup(Environment::Test, KeyClass::Onprem, version).unwrap()
            );
        }
        assert_eq!(Environment::AdminProd.key_set(), KeySet::Prod);
    }

    #[test]
    fn test_non_production_uses_test_keys() {
        for env in [
            Environment::Staging,
            Environment::Dev,
            Environment::Latest,
            Environment::Local,
            Environment::Mock,
        ] {
            assert_eq!(
                PubkeyTrustStore::lookup(env, KeyClass::Nitro, ProtocolVersion::Mpcv2).unwrap(),
                TEST_NITRO_MPCV2
            );
        }
    }

    #[test]
    fn test_unprovisioned_combination_fails_closed() {
        let err = PubkeyTrustStore::lookup(Environment::Prod, KeyClass::Nitro, ProtocolVersion::Mpcv2)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_key_class_parse_is_lenient() {
        assert_eq!(KeyClass::parse("nitro"), KeyClass::Nitro);
        assert_eq!(KeyClass::parse("onprem"), KeyClass::Onprem);
        assert_eq!(KeyClass::parse("anything"), KeyClass::Onprem);
    }

    #[test]
    fn test_all_pinned_keys_parse() {
        assert_eq!(PubkeyTrustStore::validate().unwrap(), 7);
    }

    #[test]
    fn test_is_pinned() {
        let pinned =
            PubkeyTrustStore::lookup(Environment::Prod, KeyClass::Onprem, ProtocolVersion::Mpcv2)
                .unwrap();
        assert!(PubkeyTrustStore::is_pinned(
            Environment::Prod,
            ProtocolVersion::Mpcv2,
            pinned
        ));
        assert!(!PubkeyTrustStore::is_pinned(
            Environment::Prod,
            ProtocolVersion::Mpcv2,
            TEST_ONPREM_MPCV2
        ));

        let fresh = GpgKeyPair::generate(PartyId::Bitgo).armored_public_key();
        assert!(!PubkeyTrustStore::is_pinned(
            Environment::Test,
            ProtocolVersion::Mpcv2,
            &fresh
        ));
    }

    #[test]
    fn test_pinning_requirement() {
        assert!(Environment::Prod.requires_pinned_keys());
        assert!(Environment::AdminStaging.requires_pinned_keys());
        assert!(!Environment::Dev.requires_pinned_keys());
        assert!(!Environment::Local.requires_pinned_keys());
        assert!(!Environment::Mock.requires_pinned_keys());
    }
}
