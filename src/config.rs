//! Command-line configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::abi;
use crate::crypto::{derive_salt, Address, Keypair, Salt, B256};
use crate::deploy::{CodeSource, PlanError};
use crate::multisig::{MultisigSpec, SafeContracts};
use crate::signer::{SignerBackend, SignerConfig, DEFAULT_DERIVATION_PATH};

/// Deterministic CREATE2 deployments across EVM chains
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Default `tracing` filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Derive a salt from namespace, chain id and nonce
    Salt(SaltArgs),
    /// Predict the CREATE2 address of some creation code
    Predict(PredictArgs),
    /// Deploy every role of a plan to one chain
    Deploy(DeployArgs),
    /// Compare deployment records across chains
    Verify(VerifyArgs),
    /// Safe multisig configuration and creation
    #[command(subcommand)]
    Multisig(MultisigCommand),
}

#[derive(Args, Debug, Clone)]
pub struct SaltArgs {
    #[arg(long)]
    pub namespace: String,

    #[arg(long)]
    pub chain_id: u64,

    #[arg(long, default_value = "0")]
    pub nonce: u64,
}

impl SaltArgs {
    pub fn salt(&self) -> Salt {
        derive_salt(&self.namespace, self.chain_id, self.nonce)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    /// Factory address
    #[arg(long)]
    pub factory: Address,

    /// Explicit salt (0x + 64 hex)
    #[arg(long, conflicts_with_all = ["namespace", "chain_id"])]
    pub salt: Option<B256>,

    /// Salt namespace, used with --chain-id and --nonce
    #[arg(long, requires = "chain_id")]
    pub namespace: Option<String>,

    #[arg(long)]
    pub chain_id: Option<u64>,

    #[arg(long, default_value = "0")]
    pub nonce: u64,

    /// Creation code as hex
    #[arg(long, conflicts_with = "artifact")]
    pub bytecode: Option<String>,

    /// Compiler artifact or hex file holding the creation code
    #[arg(long)]
    pub artifact: Option<PathBuf>,
}

impl PredictArgs {
    pub fn salt(&self) -> Result<Salt, ConfigError> {
        match (&self.salt, &self.namespace, self.chain_id) {
            (Some(salt), _, _) => Ok(*salt),
            (None, Some(namespace), Some(chain_id)) => {
                Ok(derive_salt(namespace, chain_id, self.nonce))
            }
            _ => Err(ConfigError::MissingInput(
                "--salt or --namespace with --chain-id".into(),
            )),
        }
    }

    pub fn creation_code(&self) -> Result<Vec<u8>, ConfigError> {
        let source = match (&self.bytecode, &self.artifact) {
            (Some(hex), _) => CodeSource::Inline {
                bytecode: abi::parse_hex(hex)
                    .map_err(|e| ConfigError::InvalidBytecode(e.to_string()))?,
            },
            (None, Some(path)) => CodeSource::Artifact {
                artifact: path.clone(),
            },
            (None, None) => {
                return Err(ConfigError::MissingInput("--bytecode or --artifact".into()))
            }
        };
        let code = source.load(Path::new("."))?;
        if code.is_empty() {
            return Err(ConfigError::InvalidBytecode("creation code is empty".into()));
        }
        Ok(code)
    }
}

/// Where transactions go.
#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// JSON-RPC endpoint
    #[arg(long, required_unless_present = "simulate")]
    pub rpc_url: Option<String>,

    /// Run against an in-memory chain instead of an RPC endpoint
    #[arg(long, default_value = "false")]
    pub simulate: bool,

    /// Chain id of the simulated chain
    #[arg(long, default_value = "31337")]
    pub simulate_chain_id: u64,

    /// Receipt poll interval in seconds
    #[arg(long, default_value = "2")]
    pub poll_interval: u64,

    /// Seconds to wait for a transaction receipt
    #[arg(long, default_value = "300")]
    pub receipt_timeout: u64,
}

impl ChainArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SignerArgs {
    /// Signing backend
    #[arg(long, value_enum, default_value = "software")]
    pub signer: SignerBackend,

    /// File holding the hex private key (software signer)
    #[arg(long)]
    pub private_key_file: Option<PathBuf>,

    /// BIP-44 path on the hardware wallet
    #[arg(long, default_value = DEFAULT_DERIVATION_PATH)]
    pub derivation_path: String,

    /// Abort unless the signer resolves to this address
    #[arg(long)]
    pub expected_address: Option<Address>,
}

impl SignerArgs {
    /// Builds the signer configuration, reading the key file if one is given.
    pub fn signer_config(&self, cancel: Arc<AtomicBool>) -> Result<SignerConfig, ConfigError> {
        let software_key = match (&self.signer, &self.private_key_file) {
            (SignerBackend::Software, Some(path)) => Some(read_key_file(path)?),
            _ => None,
        };
        Ok(SignerConfig {
            backend: self.signer,
            software_key,
            derivation_path: self.derivation_path.clone(),
            expected_address: self.expected_address,
            cancel,
        })
    }
}

fn read_key_file(path: &Path) -> Result<Keypair, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Keypair::from_hex(text.trim()).map_err(|_| ConfigError::InvalidKey(path.to_path_buf()))
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Deployment plan (JSON)
    pub plan: PathBuf,

    /// Overrides the plan's output directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(flatten)]
    pub signer: SignerArgs,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Record files, reference first; defaults to every create2-*.json in --dir
    pub files: Vec<PathBuf>,

    #[arg(long, default_value = "deployments")]
    pub dir: PathBuf,

    /// Endpoint for the live check when only one record is given
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Print the report as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,

    /// When reading --dir, keep only the newest record of each network
    #[arg(long, default_value = "false")]
    pub latest_per_network: bool,
}

impl VerifyArgs {
    /// Returns the number of workers, defaulting to CPU count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum MultisigCommand {
    /// Check a multisig configuration file
    Validate {
        config: PathBuf,
    },
    /// Validate, then create the Safe
    Create(MultisigCreateArgs),
    /// Show the most recent Safe record for a level
    Show {
        #[arg(long)]
        level: u8,

        #[arg(long)]
        network: Option<String>,

        #[arg(long, default_value = "deployments")]
        dir: PathBuf,
    },
    /// Print the authorization hierarchy
    Hierarchy,
}

#[derive(Args, Debug, Clone)]
pub struct MultisigCreateArgs {
    /// Multisig configuration (JSON)
    pub config: PathBuf,

    /// Network name used in records and dashboard links
    #[arg(long)]
    pub network: String,

    /// Nonce mixed into the derived salt nonce
    #[arg(long, default_value = "0")]
    pub nonce: u64,

    #[arg(long, default_value = "1000000")]
    pub gas_limit: u64,

    #[arg(long, default_value = "deployments")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(flatten)]
    pub signer: SignerArgs,
}

/// A multisig configuration file: levels and signers plus optional Safe settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigPlan {
    #[serde(flatten)]
    pub spec: MultisigSpec,
    /// Safe contracts; the v1.3.0 canonical deployment when absent.
    #[serde(default)]
    pub safe: Option<SafeContracts>,
    #[serde(default)]
    pub salt_nonce: Option<B256>,
}

impl MultisigPlan {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn contracts(&self) -> SafeContracts {
        self.safe.unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing input: {0}")]
    MissingInput(String),
    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("Invalid private key in {0}")]
    InvalidKey(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("create2_deploy").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_salt_command() {
        let cli = parse(&["salt", "--namespace", "402.vln.gg-v1-router", "--chain-id", "8453"]);
        match cli.command {
            Command::Salt(args) => {
                assert_eq!(args.nonce, 0);
                assert_eq!(args.salt(), derive_salt("402.vln.gg-v1-router", 8453, 0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_predict_requires_salt_source() {
        let cli = parse(&[
            "predict",
            "--factory",
            "0x4e59b44847b379578588920ca78fbf26c0b4956c",
            "--bytecode",
            "0x6080",
        ]);
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert!(matches!(args.salt(), Err(ConfigError::MissingInput(_))));
        assert_eq!(args.creation_code().unwrap(), vec![0x60, 0x80]);
    }

    #[test]
    fn test_predict_rejects_empty_bytecode() {
        let cli = parse(&[
            "predict",
            "--factory",
            "0x4e59b44847b379578588920ca78fbf26c0b4956c",
            "--salt",
            "0x0000000000000000000000000000000000000000000000000000000000000001",
            "--bytecode",
            "0x",
        ]);
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert!(args.salt().is_ok());
        assert!(matches!(
            args.creation_code(),
            Err(ConfigError::InvalidBytecode(_))
        ));
    }

    #[test]
    fn test_deploy_needs_rpc_or_simulate() {
        assert!(Cli::try_parse_from(["create2_deploy", "deploy", "plan.json"]).is_err());

        let cli = parse(&["-v", "deploy", "plan.json", "--simulate", "--signer", "ledger"]);
        assert_eq!(cli.log_filter(), "debug");
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert!(args.chain.simulate);
        assert_eq!(args.signer.signer, SignerBackend::Ledger);
        assert_eq!(args.signer.derivation_path, DEFAULT_DERIVATION_PATH);

        let config = args.signer.signer_config(Arc::new(AtomicBool::new(false))).unwrap();
        assert!(config.software_key.is_none());
    }

    #[test]
    fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, format!("0x{}\n", "42".repeat(32))).unwrap();
        let args = SignerArgs {
            signer: SignerBackend::Software,
            private_key_file: Some(path.clone()),
            derivation_path: DEFAULT_DERIVATION_PATH.into(),
            expected_address: None,
        };
        let config = args.signer_config(Arc::new(AtomicBool::new(false))).unwrap();
        let expected = Keypair::from_secret_key([0x42; 32]).unwrap();
        assert_eq!(
            config.software_key.map(|k| *k.address()),
            Some(*expected.address())
        );

        fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            args.signer_config(Arc::new(AtomicBool::new(false))),
            Err(ConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_multisig_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.json");
        fs::write(
            &path,
            r#"{
                "level": 2,
                "name": "Admin",
                "signers": [
                    "0x1111111111111111111111111111111111111111",
                    "0x2222222222222222222222222222222222222222",
                    "0x3333333333333333333333333333333333333333"
                ],
                "threshold": 2
            }"#,
        )
        .unwrap();
        let plan = MultisigPlan::load(&path).unwrap();
        assert!(plan.spec.validate().valid);
        assert_eq!(plan.contracts(), SafeContracts::default());
        assert!(plan.salt_nonce.is_none());
    }

    #[test]
    fn test_multisig_subcommands() {
        let cli = parse(&["multisig", "show", "--level", "3", "--network", "base"]);
        assert!(matches!(
            cli.command,
            Command::Multisig(MultisigCommand::Show { level: 3, .. })
        ));
        assert!(matches!(
            parse(&["multisig", "hierarchy"]).command,
            Command::Multisig(MultisigCommand::Hierarchy)
        ));
    }
}
