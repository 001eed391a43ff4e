//! Persisted deployment artifacts.
//!
//! One JSON file per run, created once and never rewritten. Field names
//! follow the `create2-*.json` / `multisig-level*.json` files operators
//! already keep, including per-role extras that are carried through as
//! metadata.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::crypto::{Address, CodeHash, Salt, B256};
use crate::multisig::SafeContracts;

const DEPLOYMENT_PREFIX: &str = "create2-";
const MULTISIG_PREFIX: &str = "multisig-level";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network: String,
    pub chain_id: u64,
    pub timestamp: DateTime<Utc>,
    pub deployer: Address,
    pub create2: FactoryMetadata,
    pub salts: BTreeMap<String, Salt>,
    pub contracts: BTreeMap<String, ContractRecord>,
    /// Auxiliary configuration copied from the plan.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    /// False when any role failed.
    #[serde(default = "default_complete")]
    pub complete: bool,
}

fn default_complete() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryMetadata {
    pub factory: Address,
    pub base_salt: String,
    pub nonce: u64,
    /// Chain id mixed into salts when it differs from `chainId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt_chain_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleStatus {
    #[default]
    Deployed,
    AlreadyDeployed,
    DeployFailed,
    ConfigurationFailed,
}

impl RoleStatus {
    /// Whether code for the role is in place.
    pub fn has_deployment(&self) -> bool {
        !matches!(self, RoleStatus::DeployFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub address: Address,
    /// keccak256 of the runtime code read back from the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode_hash: Option<CodeHash>,
    #[serde(default)]
    pub status: RoleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigRecord {
    pub network: String,
    pub chain_id: u64,
    pub timestamp: DateTime<Utc>,
    pub deployer: Address,
    pub multisig: MultisigDetails,
    pub gnosis_safe: SafeContracts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigDetails {
    pub level: u8,
    pub name: String,
    pub address: Address,
    pub threshold: u64,
    pub signers: Vec<Address>,
    pub owners: Vec<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRef {
    pub hash: B256,
    pub block_number: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{path}: malformed record: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("refusing to overwrite existing record {0}")]
    AlreadyExists(PathBuf),
    #[error("no {0} records found")]
    NotFound(String),
    #[error("invalid network name {0:?}: use letters, digits, '-' and '_'")]
    InvalidNetwork(String),
}

/// Network names become part of record and lock file names.
pub fn validate_network(network: &str) -> Result<(), RecordError> {
    let valid = !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RecordError::InvalidNetwork(network.to_string()))
    }
}

/// Directory of record files.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn deployment_file_name(record: &DeploymentRecord) -> String {
        format!(
            "{DEPLOYMENT_PREFIX}{}-{}-{}.json",
            record.network,
            record.chain_id,
            record.timestamp.timestamp_millis()
        )
    }

    pub fn multisig_file_name(record: &MultisigRecord) -> String {
        format!(
            "{MULTISIG_PREFIX}{}-{}-{}.json",
            record.multisig.level,
            record.network,
            record.timestamp.timestamp_millis()
        )
    }

    pub fn write_deployment(&self, record: &DeploymentRecord) -> Result<PathBuf, RecordError> {
        validate_network(&record.network)?;
        self.write_new(&Self::deployment_file_name(record), record)
    }

    pub fn write_multisig(&self, record: &MultisigRecord) -> Result<PathBuf, RecordError> {
        validate_network(&record.network)?;
        self.write_new(&Self::multisig_file_name(record), record)
    }

    fn write_new<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, RecordError> {
        fs::create_dir_all(&self.dir).map_err(|source| RecordError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    RecordError::AlreadyExists(path.clone())
                } else {
                    RecordError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| RecordError::Json {
            path: path.clone(),
            source,
        })?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|source| RecordError::Io {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "record written");
        Ok(path)
    }

    pub fn load_deployment(path: &Path) -> Result<DeploymentRecord, RecordError> {
        read_json(path)
    }

    /// All deployment records in the directory, ordered by file name.
    pub fn load_deployments(&self) -> Result<Vec<(PathBuf, DeploymentRecord)>, RecordError> {
        self.matching_files(|name| name.starts_with(DEPLOYMENT_PREFIX))?
            .into_iter()
            .map(|path| read_json(&path).map(|record| (path, record)))
            .collect()
    }

    /// The newest deployment record for each `(network, chainId)`.
    ///
    /// Reruns leave the earlier, possibly incomplete, records in place; this
    /// drops every record a later run of the same chain superseded.
    pub fn load_latest_deployments(
        &self,
    ) -> Result<Vec<(PathBuf, DeploymentRecord)>, RecordError> {
        let mut latest: BTreeMap<(String, u64), (PathBuf, DeploymentRecord)> = BTreeMap::new();
        for (path, record) in self.load_deployments()? {
            let key = (record.network.clone(), record.chain_id);
            match latest.get(&key) {
                Some((_, kept)) if kept.timestamp > record.timestamp => {}
                _ => {
                    latest.insert(key, (path, record));
                }
            }
        }
        let mut records: Vec<_> = latest.into_values().collect();
        records.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        Ok(records)
    }

    /// Most recent multisig record for `level`, optionally restricted to `network`.
    pub fn latest_multisig(
        &self,
        level: u8,
        network: Option<&str>,
    ) -> Result<(PathBuf, MultisigRecord), RecordError> {
        let prefix = format!("{MULTISIG_PREFIX}{level}-");
        let mut latest: Option<(PathBuf, MultisigRecord)> = None;
        for path in self.matching_files(|name| name.starts_with(&prefix))? {
            let record: MultisigRecord = read_json(&path)?;
            if network.map_or(false, |n| record.network != n) {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |(_, kept)| record.timestamp >= kept.timestamp)
            {
                latest = Some((path, record));
            }
        }
        latest.ok_or_else(|| {
            RecordError::NotFound(match network {
                Some(n) => format!("level {level} multisig on {n}"),
                None => format!("level {level} multisig"),
            })
        })
    }

    fn matching_files(&self, accept: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, RecordError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| RecordError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.ends_with(".json") && accept(n))
            })
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, RecordError> {
    let file = File::open(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| RecordError::Json {
        path: path.to_path_buf(),
        source,
    })
}
