//! Deployment plan files.
//!
//! A plan names the network, the salt namespace, the factory and the roles
//! to deploy. Paths inside the plan are resolved against the plan's own
//! directory. Resolving a plan yields the [`OrchestratorConfig`] the
//! orchestrator runs with; nothing is read from the environment.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lock::default_lock_dir;
use crate::abi::{self, AbiValue};
use crate::crypto::Address;

pub const DEFAULT_GAS_LIMIT: u64 = 5_000_000;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path}: no bytecode found in artifact")]
    Artifact { path: PathBuf },
    #[error("{path}: {source}")]
    Bytecode { path: PathBuf, source: abi::AbiError },
}

/// Where creation code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeSource {
    /// Compiler artifact with a `bytecode` field, or a file of raw hex.
    Artifact { artifact: PathBuf },
    Inline { bytecode: Bytes },
}

impl CodeSource {
    pub fn load(&self, base_dir: &Path) -> Result<Vec<u8>, PlanError> {
        match self {
            CodeSource::Inline { bytecode } => Ok(bytecode.to_vec()),
            CodeSource::Artifact { artifact } => load_artifact(&base_dir.join(artifact)),
        }
    }
}

fn load_artifact(path: &Path) -> Result<Vec<u8>, PlanError> {
    let text = fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let hex_text = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => match map.get("bytecode") {
            Some(Value::String(s)) => s.clone(),
            // some toolchains nest it: {"bytecode": {"object": "0x.."}}
            Some(Value::Object(inner)) => match inner.get("object") {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    return Err(PlanError::Artifact {
                        path: path.to_path_buf(),
                    })
                }
            },
            _ => {
                return Err(PlanError::Artifact {
                    path: path.to_path_buf(),
                })
            }
        },
        _ => text,
    };
    abi::parse_hex(&hex_text)
        .map(|b| b.to_vec())
        .map_err(|source| PlanError::Bytecode {
            path: path.to_path_buf(),
            source,
        })
}

/// An existing factory, or the code to bootstrap one from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorySource {
    Existing { address: Address },
    Deploy(CodeSource),
}

/// A view call whose result tells whether a configuration call already took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCheck {
    pub signature: String,
    #[serde(default)]
    pub args: Vec<AbiValue>,
    pub expect: AbiValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeployCall {
    pub description: String,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<AbiValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CallCheck>,
}

impl PostDeployCall {
    pub fn calldata(&self) -> Vec<u8> {
        abi::encode_call(&self.signature, &self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub name: String,
    /// Salt label; defaults to the lowercased name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Overrides the plan nonce for this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(flatten)]
    pub code: CodeSource,
    #[serde(default)]
    pub constructor_args: Vec<AbiValue>,
    #[serde(default)]
    pub post_deploy: Vec<PostDeployCall>,
    /// Extra fields copied into the role's record entry.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub network: String,
    #[serde(alias = "baseSalt")]
    pub namespace: String,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt_chain_id: Option<u64>,
    pub factory: FactorySource,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub config: Value,
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("deployments")
}

/// A role with its creation code loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRole {
    pub name: String,
    pub label: String,
    pub nonce: Option<u64>,
    /// Bytecode followed by the ABI-encoded constructor arguments.
    pub creation_code: Vec<u8>,
    pub post_deploy: Vec<PostDeployCall>,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactoryConfig {
    Existing(Address),
    Bootstrap { creation_code: Vec<u8> },
}

/// Everything one orchestrator run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub network: String,
    pub namespace: String,
    pub nonce: u64,
    pub salt_chain_id: Option<u64>,
    pub factory: FactoryConfig,
    pub gas_limit: u64,
    pub output_dir: PathBuf,
    /// Where run locks are taken; shared by every run on this machine by default.
    pub lock_dir: PathBuf,
    pub roles: Vec<ResolvedRole>,
    pub config: Value,
}

impl DeploymentPlan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut plan: DeploymentPlan =
            serde_json::from_str(&text).map_err(|source| PlanError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        plan.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(plan)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Loads all code and produces the orchestrator configuration.
    pub fn resolve(&self) -> Result<OrchestratorConfig, PlanError> {
        let factory = match &self.factory {
            FactorySource::Existing { address } => FactoryConfig::Existing(*address),
            FactorySource::Deploy(source) => FactoryConfig::Bootstrap {
                creation_code: source.load(&self.base_dir)?,
            },
        };

        let roles = self
            .roles
            .iter()
            .map(|role| {
                let mut creation_code = role.code.load(&self.base_dir)?;
                if !creation_code.is_empty() {
                    creation_code.extend(abi::encode_values(&role.constructor_args));
                }
                Ok(ResolvedRole {
                    name: role.name.clone(),
                    label: role
                        .label
                        .clone()
                        .unwrap_or_else(|| role.name.to_lowercase()),
                    nonce: role.nonce,
                    creation_code,
                    post_deploy: role.post_deploy.clone(),
                    metadata: role.metadata.clone(),
                })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;

        Ok(OrchestratorConfig {
            network: self.network.clone(),
            namespace: self.namespace.clone(),
            nonce: self.nonce,
            salt_chain_id: self.salt_chain_id,
            factory,
            gas_limit: self.gas_limit,
            output_dir: self.base_dir.join(&self.output_dir),
            lock_dir: default_lock_dir(),
            roles,
            config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use alloy_sol_types::SolValue;

    use crate::abi::UintValue;

    const PLAN: &str = r#"{
        "network": "base-sepolia",
        "baseSalt": "402.vln.gg-v1",
        "nonce": 0,
        "saltChainId": 8453,
        "factory": { "address": "0x1111111111111111111111111111111111111111" },
        "roles": [
            {
                "name": "feeCollector",
                "bytecode": "0x6080",
                "constructorArgs": [{ "type": "uint", "value": 250 }],
                "metadata": { "feeBps": 250 }
            },
            {
                "name": "router",
                "label": "router-v2",
                "nonce": 3,
                "artifact": "artifacts/Router.json",
                "postDeploy": [
                    {
                        "description": "support USDC",
                        "signature": "setSupportedToken(address,bool)",
                        "args": [
                            { "type": "address", "value": "0x036cbd53842c5426634e7929541ec2318f3dcf7e" },
                            { "type": "bool", "value": true }
                        ],
                        "check": {
                            "signature": "supportedTokens(address)",
                            "args": [{ "type": "address", "value": "0x036cbd53842c5426634e7929541ec2318f3dcf7e" }],
                            "expect": { "type": "bool", "value": true }
                        }
                    }
                ]
            }
        ],
        "config": { "usdc": "0x036cbd53842c5426634e7929541ec2318f3dcf7e" }
    }"#;

    fn write_plan(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir.join("artifacts")).unwrap();
        fs::write(
            dir.join("artifacts/Router.json"),
            r#"{"contractName": "Router", "bytecode": "0x60806040"}"#,
        )
        .unwrap();
        let path = dir.join("plan.json");
        fs::write(&path, PLAN).unwrap();
        path
    }

    #[test]
    fn test_load_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let plan = DeploymentPlan::load(&write_plan(dir.path())).unwrap();
        assert_eq!(plan.namespace, "402.vln.gg-v1");
        assert_eq!(plan.gas_limit, DEFAULT_GAS_LIMIT);

        let config = plan.resolve().unwrap();
        assert_eq!(config.salt_chain_id, Some(8453));
        assert_eq!(config.output_dir, dir.path().join("deployments"));
        assert!(matches!(config.factory, FactoryConfig::Existing(_)));

        let fee = &config.roles[0];
        assert_eq!(fee.label, "feecollector");
        assert_eq!(&fee.creation_code[..2], &[0x60, 0x80]);
        assert_eq!(U256::abi_decode(&fee.creation_code[2..]).unwrap(), U256::from(250));
        assert_eq!(fee.metadata["feeBps"], 250);

        let router = &config.roles[1];
        assert_eq!(router.label, "router-v2");
        assert_eq!(router.nonce, Some(3));
        assert_eq!(router.creation_code, vec![0x60, 0x80, 0x60, 0x40]);
        assert_eq!(router.post_deploy.len(), 1);
        assert_eq!(&router.post_deploy[0].calldata()[..4], &abi::selector("setSupportedToken(address,bool)"));
    }

    #[test]
    fn test_raw_hex_artifact_and_bootstrap_factory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Factory.hex"), "0xdeadbeef\n").unwrap();
        let plan: DeploymentPlan = serde_json::from_str(
            r#"{
                "network": "local",
                "namespace": "ns",
                "factory": { "artifact": "Factory.hex" },
                "roles": []
            }"#,
        )
        .unwrap();
        let plan = DeploymentPlan {
            base_dir: dir.path().to_path_buf(),
            ..plan
        };
        match plan.resolve().unwrap().factory {
            FactoryConfig::Bootstrap { creation_code } => {
                assert_eq!(creation_code, vec![0xde, 0xad, 0xbe, 0xef])
            }
            other => panic!("unexpected factory {other:?}"),
        }
    }

    #[test]
    fn test_empty_bytecode_stays_empty() {
        let plan: DeploymentPlan = serde_json::from_str(
            r#"{
                "network": "local",
                "namespace": "ns",
                "factory": { "address": "0x1111111111111111111111111111111111111111" },
                "roles": [{
                    "name": "treasury",
                    "bytecode": "0x",
                    "constructorArgs": [{ "type": "uint", "value": "1" }]
                }]
            }"#,
        )
        .unwrap();
        let config = plan.resolve().unwrap();
        assert!(config.roles[0].creation_code.is_empty());
        assert_eq!(
            plan.roles[0].constructor_args,
            vec![AbiValue::Uint(UintValue::parse("1").unwrap())]
        );
    }

    #[test]
    fn test_artifact_without_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Empty.json");
        fs::write(&path, r#"{"abi": []}"#).unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(PlanError::Artifact { .. })
        ));
    }
}
