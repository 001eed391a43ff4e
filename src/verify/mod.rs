//! Cross-chain deployment verification.
//!
//! The first record (callers pass them sorted by file name) is the
//! reference. Every other record is compared against it role by role;
//! comparisons are independent and run on a rayon pool. A single record
//! is checked against live chain state instead.
//!
//! Matching runtime bytecode does not prove identical constructor-time
//! behaviour: values a constructor writes to storage or bakes into
//! immutables per chain are only visible if they change the runtime code.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError};
use crate::crypto::{code_hash, Address, CodeHash};
use crate::record::{ContractRecord, DeploymentRecord};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("no deployment records to verify")]
    NoRecords,
    #[error("a single record can only be verified against a live chain")]
    LiveChainRequired,
    #[error("record is for chain {record}, connected chain is {connected}")]
    WrongChain { record: u64, connected: u64 },
    #[error("failed to build verification pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Outcome for one role on one compared chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleComparison {
    pub role: String,
    pub address_match: bool,
    pub bytecode_match: bool,
    pub reference_address: Option<Address>,
    pub compared_address: Option<Address>,
    pub reference_hash: Option<CodeHash>,
    pub compared_hash: Option<CodeHash>,
}

impl RoleComparison {
    /// Same address, different code: something else is running behind
    /// the address users expect.
    pub fn is_critical(&self) -> bool {
        self.address_match
            && !self.bytecode_match
            && self.reference_hash.is_some()
            && self.compared_hash.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainComparison {
    pub network: String,
    pub chain_id: u64,
    pub roles: Vec<RoleComparison>,
    pub warnings: Vec<String>,
}

impl ChainComparison {
    pub fn is_consistent(&self) -> bool {
        self.roles.iter().all(|r| r.address_match && r.bytecode_match)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalFinding {
    pub role: String,
    pub network: String,
    pub address: Address,
    pub reference_hash: CodeHash,
    pub compared_hash: CodeHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainReport {
    pub reference_network: String,
    pub reference_chain_id: u64,
    pub comparisons: Vec<ChainComparison>,
    pub critical: Vec<CriticalFinding>,
    pub address_consistent: bool,
    pub bytecode_consistent: bool,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRoleCheck {
    pub role: String,
    pub address: Address,
    pub code_present: bool,
    pub expected_hash: Option<CodeHash>,
    pub actual_hash: Option<CodeHash>,
    pub hash_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveReport {
    pub network: String,
    pub chain_id: u64,
    pub roles: Vec<LiveRoleCheck>,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum VerificationReport {
    CrossChain(CrossChainReport),
    Live(LiveReport),
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        match self {
            VerificationReport::CrossChain(r) => r.valid,
            VerificationReport::Live(r) => r.valid,
        }
    }
}

pub struct CrossChainVerifier {
    workers: usize,
}

impl CrossChainVerifier {
    /// `workers` defaults to the number of CPUs.
    pub fn new(workers: Option<usize>) -> Self {
        Self {
            workers: workers.unwrap_or_else(num_cpus::get).max(1),
        }
    }

    /// Verifies `records`, reference first.
    ///
    /// `live` is consulted only when exactly one record is given.
    pub fn verify(
        &self,
        records: &[DeploymentRecord],
        live: Option<&dyn ChainClient>,
    ) -> Result<VerificationReport, VerifyError> {
        match records {
            [] => Err(VerifyError::NoRecords),
            [single] => {
                let chain = live.ok_or(VerifyError::LiveChainRequired)?;
                Ok(VerificationReport::Live(Self::verify_live(single, chain)?))
            }
            [reference, rest @ ..] => Ok(VerificationReport::CrossChain(
                self.verify_cross_chain(reference, rest)?,
            )),
        }
    }

    pub fn verify_cross_chain(
        &self,
        reference: &DeploymentRecord,
        others: &[DeploymentRecord],
    ) -> Result<CrossChainReport, VerifyError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| VerifyError::Pool(e.to_string()))?;

        info!(
            reference = %reference.network,
            compared = others.len(),
            workers = self.workers,
            "verifying cross-chain consistency"
        );
        let comparisons: Vec<ChainComparison> = pool.install(|| {
            others
                .par_iter()
                .map(|record| compare_records(reference, record))
                .collect()
        });

        let critical: Vec<CriticalFinding> = comparisons
            .iter()
            .flat_map(|c| {
                c.roles.iter().filter(|r| r.is_critical()).filter_map(move |r| {
                    Some(CriticalFinding {
                        role: r.role.clone(),
                        network: c.network.clone(),
                        address: r.reference_address?,
                        reference_hash: r.reference_hash?,
                        compared_hash: r.compared_hash?,
                    })
                })
            })
            .collect();
        for finding in &critical {
            warn!(
                role = %finding.role,
                network = %finding.network,
                address = %finding.address,
                "identical address with different bytecode"
            );
        }

        let roles = || comparisons.iter().flat_map(|c| c.roles.iter());
        let address_consistent = roles().all(|r| r.address_match);
        let bytecode_consistent = roles().all(|r| r.bytecode_match);

        Ok(CrossChainReport {
            reference_network: reference.network.clone(),
            reference_chain_id: reference.chain_id,
            valid: address_consistent && bytecode_consistent,
            address_consistent,
            bytecode_consistent,
            critical,
            comparisons,
        })
    }

    /// Compares a record's stored hashes with the code currently on `chain`.
    pub fn verify_live(
        record: &DeploymentRecord,
        chain: &dyn ChainClient,
    ) -> Result<LiveReport, VerifyError> {
        let connected = chain.chain_id()?;
        if connected != record.chain_id {
            return Err(VerifyError::WrongChain {
                record: record.chain_id,
                connected,
            });
        }

        let mut roles = Vec::with_capacity(record.contracts.len());
        for (role, contract) in &record.contracts {
            let code = chain.get_code(&contract.address)?;
            let actual_hash = (!code.is_empty()).then(|| code_hash(&code));
            let hash_match = actual_hash.is_some() && actual_hash == contract.bytecode_hash;
            debug!(%role, address = %contract.address, present = actual_hash.is_some(), hash_match, "live check");
            roles.push(LiveRoleCheck {
                role: role.clone(),
                address: contract.address,
                code_present: actual_hash.is_some(),
                expected_hash: contract.bytecode_hash,
                actual_hash,
                hash_match,
            });
        }

        let valid = !roles.is_empty() && roles.iter().all(|r| r.code_present && r.hash_match);
        Ok(LiveReport {
            network: record.network.clone(),
            chain_id: record.chain_id,
            roles,
            valid,
        })
    }
}

fn compare_roles(
    role: &str,
    reference: Option<&ContractRecord>,
    compared: Option<&ContractRecord>,
) -> RoleComparison {
    let reference_address = reference.map(|c| c.address);
    let compared_address = compared.map(|c| c.address);
    let reference_hash = reference.and_then(|c| c.bytecode_hash);
    let compared_hash = compared.and_then(|c| c.bytecode_hash);

    RoleComparison {
        role: role.to_string(),
        address_match: reference_address.is_some() && reference_address == compared_address,
        bytecode_match: reference_hash.is_some() && reference_hash == compared_hash,
        reference_address,
        compared_address,
        reference_hash,
        compared_hash,
    }
}

fn compare_records(reference: &DeploymentRecord, record: &DeploymentRecord) -> ChainComparison {
    let names: BTreeSet<&String> = reference
        .contracts
        .keys()
        .chain(record.contracts.keys())
        .collect();
    let roles = names
        .into_iter()
        .map(|role| {
            compare_roles(
                role,
                reference.contracts.get(role),
                record.contracts.get(role),
            )
        })
        .collect();

    let mut warnings = Vec::new();
    let (a, b) = (&reference.create2, &record.create2);
    if a.factory != b.factory {
        warnings.push(format!(
            "factory differs: {} uses {}, {} uses {}",
            reference.network, a.factory, record.network, b.factory
        ));
    }
    if a.base_salt != b.base_salt {
        warnings.push(format!(
            "base salt differs: {:?} vs {:?}",
            a.base_salt, b.base_salt
        ));
    }
    if a.nonce != b.nonce {
        warnings.push(format!("nonce differs: {} vs {}", a.nonce, b.nonce));
    }
    if a.salt_chain_id.unwrap_or(reference.chain_id) != b.salt_chain_id.unwrap_or(record.chain_id) {
        warnings.push("salts were derived from different chain ids".to_string());
    }
    if !record.complete {
        warnings.push(format!("{} record is incomplete", record.network));
    }

    ChainComparison {
        network: record.network.clone(),
        chain_id: record.chain_id,
        roles,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedChain;
    use crate::crypto::B256;
    use crate::record::{FactoryMetadata, RoleStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn contract(address: u8, hash: u8) -> ContractRecord {
        ContractRecord {
            address: Address::from_bytes([address; 20]),
            bytecode_hash: Some(B256::from_bytes([hash; 32])),
            status: RoleStatus::Deployed,
            deployed_at_block: None,
            transaction_hash: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    fn record(network: &str, chain_id: u64, contracts: Vec<(&str, ContractRecord)>) -> DeploymentRecord {
        DeploymentRecord {
            network: network.into(),
            chain_id,
            timestamp: Utc::now(),
            deployer: Address::ZERO,
            create2: FactoryMetadata {
                factory: Address::from_bytes([0xfa; 20]),
                base_salt: "402.vln.gg-v1".into(),
                nonce: 0,
                salt_chain_id: Some(8453),
            },
            salts: BTreeMap::new(),
            contracts: contracts
                .into_iter()
                .map(|(role, c)| (role.to_string(), c))
                .collect(),
            config: serde_json::Value::Null,
            complete: true,
        }
    }

    fn three_roles() -> Vec<(&'static str, ContractRecord)> {
        vec![
            ("treasury", contract(1, 0x11)),
            ("router", contract(2, 0x22)),
            ("feeCollector", contract(3, 0x33)),
        ]
    }

    #[test]
    fn test_identical_records_are_valid() {
        let records = [
            record("base", 8453, three_roles()),
            record("ethereum", 1, three_roles()),
            record("arbitrum", 42161, three_roles()),
        ];
        let report = CrossChainVerifier::new(Some(2)).verify(&records, None).unwrap();
        let VerificationReport::CrossChain(report) = report else {
            panic!("expected cross-chain report");
        };
        assert!(report.valid);
        assert_eq!(report.comparisons.len(), 2);
        assert_eq!(report.comparisons[0].network, "ethereum");
        assert!(report.comparisons.iter().all(|c| c.warnings.is_empty()));
        assert!(report.critical.is_empty());
    }

    #[test]
    fn test_bytecode_mismatch_behind_same_address() {
        let mut roles = three_roles();
        roles[1].1 = contract(2, 0x99);
        let records = [record("base", 8453, three_roles()), record("ethereum", 1, roles)];

        let report = CrossChainVerifier::new(None).verify(&records, None).unwrap();
        assert!(!report.is_valid());
        let VerificationReport::CrossChain(report) = report else {
            panic!("expected cross-chain report");
        };
        let router = report.comparisons[0]
            .roles
            .iter()
            .find(|r| r.role == "router")
            .unwrap();
        assert!(router.address_match);
        assert!(!router.bytecode_match);
        assert!(report.address_consistent);
        assert!(!report.bytecode_consistent);
        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.critical[0].role, "router");
    }

    #[test]
    fn test_address_and_bytecode_reported_independently() {
        let mut roles = three_roles();
        roles[0].1 = contract(9, 0x11);
        let records = [record("base", 8453, three_roles()), record("ethereum", 1, roles)];
        let VerificationReport::CrossChain(report) =
            CrossChainVerifier::new(Some(1)).verify(&records, None).unwrap()
        else {
            panic!("expected cross-chain report");
        };
        let treasury = &report.comparisons[0].roles.iter().find(|r| r.role == "treasury").unwrap();
        assert!(!treasury.address_match);
        assert!(treasury.bytecode_match);
        assert!(report.critical.is_empty());
        assert!(!report.valid);
    }

    #[test]
    fn test_missing_role_and_missing_hash() {
        let mut roles = three_roles();
        roles.remove(2);
        roles[0].1.bytecode_hash = None;
        roles[0].1.status = RoleStatus::DeployFailed;
        let mut compared = record("ethereum", 1, roles);
        compared.complete = false;
        compared.create2.nonce = 1;
        let records = [record("base", 8453, three_roles()), compared];

        let VerificationReport::CrossChain(report) =
            CrossChainVerifier::new(Some(1)).verify(&records, None).unwrap()
        else {
            panic!("expected cross-chain report");
        };
        let chain = &report.comparisons[0];
        let fee = chain.roles.iter().find(|r| r.role == "feeCollector").unwrap();
        assert!(!fee.address_match && !fee.bytecode_match);
        let treasury = chain.roles.iter().find(|r| r.role == "treasury").unwrap();
        assert!(treasury.address_match && !treasury.bytecode_match);
        assert!(!treasury.is_critical());
        assert_eq!(chain.warnings.len(), 2);
        assert!(!report.valid);
    }

    #[test]
    fn test_no_records() {
        assert!(matches!(
            CrossChainVerifier::new(None).verify(&[], None),
            Err(VerifyError::NoRecords)
        ));
    }

    #[test]
    fn test_single_record_needs_chain() {
        let records = [record("base", 8453, three_roles())];
        assert!(matches!(
            CrossChainVerifier::new(None).verify(&records, None),
            Err(VerifyError::LiveChainRequired)
        ));
    }

    #[test]
    fn test_live_check_against_chain() {
        use crate::chain::ContractBehavior;

        let chain = SimulatedChain::new(8453);
        let address = Address::from_bytes([0x42; 20]);
        chain.install_contract(address, b"router", ContractBehavior::Opaque, Address::ZERO);
        let deployed = code_hash(&chain.get_code(&address).unwrap());

        let mut good = contract(0x42, 0);
        good.bytecode_hash = Some(deployed);
        let missing = contract(0x43, 0x11);
        let records = [record("base", 8453, vec![("router", good.clone())])];
        let report = CrossChainVerifier::new(None).verify(&records, Some(&chain)).unwrap();
        assert!(report.is_valid());

        let report = CrossChainVerifier::verify_live(
            &record("base", 8453, vec![("router", good), ("treasury", missing)]),
            &chain,
        )
        .unwrap();
        assert!(!report.valid);
        let treasury = report.roles.iter().find(|r| r.role == "treasury").unwrap();
        assert!(!treasury.code_present);

        assert!(matches!(
            CrossChainVerifier::verify_live(&record("eth", 1, vec![]), &chain),
            Err(VerifyError::WrongChain { .. })
        ));
    }
}
