//! Tessera CLI - Generate threshold EdDSA wallet keychains with BitGo

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tessera_core::{
    decrypt_private_material, DkgEngine, Environment, KeyClass, ProtocolVersion, PubkeyTrustStore,
};
use tessera_frost::{FrostDkgFactory, FrostDkgSession};
use tessera_keygen::{
    GenerateKeychainsParams, HttpKeychainStore, HttpRemoteCoordinator, KeyGenConfig,
    KeyGenCoordinator, KeychainRecord, TrustSettings,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PASSPHRASE_ENV: &str = "TESSERA_WALLET_PASSPHRASE";

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Threshold EdDSA keychain generation with BitGo", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $TESSERA_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate User, Backup and BitGo keychains
    Keygen {
        /// Enterprise the wallet belongs to
        #[arg(short, long)]
        enterprise: String,

        /// Environment variable holding the wallet passphrase
        #[arg(long, default_value = DEFAULT_PASSPHRASE_ENV)]
        passphrase_env: String,

        /// Legacy passcode encryption code to carry on the keychains
        #[arg(long)]
        original_passcode_encryption_code: Option<String>,

        /// Write the keychain records to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pinned BitGo key commands
    #[command(subcommand)]
    TrustStore(TrustStoreCommands),

    /// Check a stored encrypted key share against the passphrase
    DecryptKey {
        /// Keychain record JSON or raw encrypted key share
        #[arg(long)]
        encrypted: PathBuf,

        /// Environment variable holding the wallet passphrase
        #[arg(long, default_value = DEFAULT_PASSPHRASE_ENV)]
        passphrase_env: String,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum TrustStoreCommands {
    /// Print the pinned BitGo key for an environment
    Show {
        /// Environment (prod, test, staging, dev, adminProd, ...)
        #[arg(long = "env")]
        environment: String,

        /// Key class (nitro or onprem)
        #[arg(long, default_value = "onprem")]
        key_class: String,

        /// Protocol version (mpcv1 or mpcv2)
        #[arg(long, default_value = "mpcv2")]
        version: String,
    },

    /// Parse every pinned key
    Validate,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(KeyGenConfig::default_path);

    match cli.command {
        Commands::Keygen {
            enterprise,
            passphrase_env,
            original_passcode_encryption_code,
            output,
        } => {
            let config = KeyGenConfig::load_or_default(&config_path)?;
            let passphrase = read_passphrase(&passphrase_env)?;
            keygen(
                &config,
                GenerateKeychainsParams {
                    passphrase,
                    enterprise,
                    original_passcode_encryption_code,
                },
                output.as_deref(),
            )
            .await?;
        }

        Commands::TrustStore(TrustStoreCommands::Show {
            environment,
            key_class,
            version,
        }) => {
            let environment: Environment = environment.parse()?;
            let version: ProtocolVersion = version.parse()?;
            let armored =
                PubkeyTrustStore::lookup(environment, KeyClass::parse(&key_class), version)?;
            print!("{}", armored);
        }

        Commands::TrustStore(TrustStoreCommands::Validate) => {
            let checked = PubkeyTrustStore::validate()?;
            println!("All {} pinned keys are valid", checked);
        }

        Commands::DecryptKey {
            encrypted,
            passphrase_env,
        } => {
            let passphrase = read_passphrase(&passphrase_env)?;
            decrypt_key(&encrypted, &passphrase)?;
        }

        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            KeyGenConfig::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }

        Commands::Config(ConfigCommands::Show) => {
            let config = KeyGenConfig::load_or_default(&config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_passphrase(var: &str) -> Result<String> {
    let passphrase =
        std::env::var(var).with_context(|| format!("{} is not set", var))?;
    if passphrase.is_empty() {
        bail!("{} is empty", var);
    }
    Ok(passphrase)
}

async fn keygen(
    config: &KeyGenConfig,
    params: GenerateKeychainsParams,
    output: Option<&Path>,
) -> Result<()> {
    let access_token = config.access_token()?;
    let remote = HttpRemoteCoordinator::new(
        &config.api_base_url,
        &config.coin,
        access_token.clone(),
        config.request_timeout(),
    )?;
    let store = HttpKeychainStore::new(
        &config.api_base_url,
        &config.coin,
        access_token,
        config.request_timeout(),
    )?;

    info!(
        "Generating keychains in {} for enterprise {}",
        config.environment, params.enterprise
    );

    let coordinator = KeyGenCoordinator::new(
        FrostDkgFactory,
        Arc::new(remote),
        Arc::new(store),
        TrustSettings::from(config),
    );
    let triplet = coordinator.generate_keychains(params).await?;

    let records = serde_json::json!({
        "userKeychain": triplet.user,
        "backupKeychain": triplet.backup,
        "bitgoKeychain": triplet.bitgo,
    });
    let rendered = serde_json::to_string_pretty(&records)?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            println!("Keychains written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    println!("Common keychain: {}", triplet.bitgo.common_keychain);
    Ok(())
}

fn decrypt_key(path: &Path, passphrase: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;

    let encrypted = match serde_json::from_str::<KeychainRecord>(&contents) {
        Ok(record) => match record.encrypted_prv {
            Some(prv) => prv,
            None => bail!("{} keychain has no private material", record.source),
        },
        Err(_) => contents.trim().to_string(),
    };

    let key_share = decrypt_private_material(&encrypted, passphrase)?;
    let common_keychain = FrostDkgSession::common_keychain(&key_share)?;
    println!("Key share decrypted for common keychain {}", common_keychain);
    Ok(())
}
