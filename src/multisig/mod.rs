//! Multisig governance levels and configuration validation.
//!
//! Three Safe tiers sit above the deployer key:
//!
//! | Level | Role      | Shape  |
//! |-------|-----------|--------|
//! | 2     | Admin     | 2-of-3 |
//! | 3     | Treasury  | 3-of-5 |
//! | 4     | Emergency | 1-of-3 |

mod safe;

pub use safe::{
    default_salt_nonce, setup_calldata, CreatedSafe, SafeContracts, SafeCreator, SafeError,
};

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MultisigLevel {
    Admin,
    Treasury,
    Emergency,
}

impl MultisigLevel {
    pub const ALL: [MultisigLevel; 3] = [
        MultisigLevel::Admin,
        MultisigLevel::Treasury,
        MultisigLevel::Emergency,
    ];

    pub fn from_number(level: i64) -> Option<Self> {
        match level {
            2 => Some(MultisigLevel::Admin),
            3 => Some(MultisigLevel::Treasury),
            4 => Some(MultisigLevel::Emergency),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            MultisigLevel::Admin => 2,
            MultisigLevel::Treasury => 3,
            MultisigLevel::Emergency => 4,
        }
    }

    pub fn required_signers(&self) -> usize {
        match self {
            MultisigLevel::Admin | MultisigLevel::Emergency => 3,
            MultisigLevel::Treasury => 5,
        }
    }

    pub fn required_threshold(&self) -> u64 {
        match self {
            MultisigLevel::Admin => 2,
            MultisigLevel::Treasury => 3,
            MultisigLevel::Emergency => 1,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            MultisigLevel::Admin => "Admin Multisig",
            MultisigLevel::Treasury => "Treasury Multisig",
            MultisigLevel::Emergency => "Emergency Response",
        }
    }

    pub fn purpose(&self) -> &'static str {
        match self {
            MultisigLevel::Admin => "Contract configuration, pause controls",
            MultisigLevel::Treasury => "Fund withdrawals, treasury management",
            MultisigLevel::Emergency => "Emergency pause, critical incident response",
        }
    }

    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            MultisigLevel::Admin => &[
                "Pause/unpause contracts",
                "Add/remove supported tokens",
                "Approve/revoke bridges",
                "Update fee parameters",
            ],
            MultisigLevel::Treasury => &[
                "Withdraw collected fees",
                "Manage treasury funds",
                "Approve large transactions",
            ],
            MultisigLevel::Emergency => &["Emergency pause only", "Cannot withdraw funds"],
        }
    }

    /// Operational notes (rotation, limits) shown with the hierarchy.
    pub fn notes(&self) -> &'static [&'static str] {
        match self {
            MultisigLevel::Admin => &["Rotation: Quarterly or on-demand"],
            MultisigLevel::Treasury => &[
                "Limits: Daily/monthly withdrawal caps",
                "Rotation: Semi-annually",
            ],
            MultisigLevel::Emergency => &[
                "Authority: Fast response team",
                "Activation: Immediate on security incident",
            ],
        }
    }
}

impl fmt::Display for MultisigLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Level {}: {} ({}-of-{})",
            self.number(),
            self.title(),
            self.required_threshold(),
            self.required_signers()
        )
    }
}

impl TryFrom<u8> for MultisigLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MultisigLevel::from_number(i64::from(value))
            .ok_or_else(|| format!("Invalid level: {value}. Must be 2, 3, or 4"))
    }
}

impl From<MultisigLevel> for u8 {
    fn from(level: MultisigLevel) -> Self {
        level.number()
    }
}

/// A proposed multisig, as written in configuration. Nothing is checked
/// until [`MultisigSpec::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigSpec {
    pub level: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub signers: Vec<String>,
    pub threshold: i64,
}

/// Every problem found in a [`MultisigSpec`], in check order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return f.write_str("configuration is valid");
        }
        f.write_str(&self.errors.join("; "))
    }
}

/// A multisig that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMultisig {
    pub level: MultisigLevel,
    pub name: String,
    pub signers: Vec<Address>,
    pub threshold: u64,
}

impl MultisigSpec {
    /// Runs every check and collects all violations.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let level = MultisigLevel::from_number(self.level);

        if level.is_none() {
            errors.push(format!("Invalid level: {}. Must be 2, 3, or 4", self.level));
        }

        if self.signers.is_empty() {
            errors.push("No signers provided".to_string());
        }

        let mut seen = HashSet::new();
        let mut duplicate = false;
        for signer in &self.signers {
            let key = match signer.trim().parse::<Address>() {
                Ok(address) => address.to_hex(),
                Err(_) => {
                    errors.push(format!("Invalid signer address: {signer}"));
                    signer.trim().to_string()
                }
            };
            duplicate |= !seen.insert(key);
        }
        if duplicate {
            errors.push("Duplicate signer addresses detected".to_string());
        }

        if self.threshold <= 0 {
            errors.push("Threshold must be greater than 0".to_string());
        }
        let count = self.signers.len();
        if self.threshold > count as i64 {
            errors.push(format!(
                "Threshold ({}) cannot exceed number of signers ({count})",
                self.threshold
            ));
        }

        if let Some(level) = level {
            let n = level.number();
            if count != level.required_signers() {
                errors.push(format!(
                    "Level {n} requires exactly {} signers, got {count}",
                    level.required_signers()
                ));
            }
            if self.threshold != level.required_threshold() as i64 {
                errors.push(format!(
                    "Level {n} requires threshold of {}, got {}",
                    level.required_threshold(),
                    self.threshold
                ));
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Validates and converts to typed form.
    pub fn validated(&self) -> Result<ValidatedMultisig, ValidationReport> {
        let report = self.validate();
        if !report.valid {
            return Err(report);
        }
        let invalid = |msg: String| ValidationReport {
            valid: false,
            errors: vec![msg],
        };
        let level = MultisigLevel::from_number(self.level)
            .ok_or_else(|| invalid(format!("Invalid level: {}", self.level)))?;
        let signers = self
            .signers
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<Address>()
                    .map_err(|_| invalid(format!("Invalid signer address: {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ValidatedMultisig {
            level,
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("Level {} Multisig", level.number())),
            signers,
            threshold: self.threshold as u64,
        })
    }
}

/// Safe web app URL for a Safe on `network`.
pub fn dashboard_url(address: &Address, network: &str) -> String {
    let lower = network.to_lowercase();
    let prefix = match lower.as_str() {
        "ethereum" | "mainnet" => "eth",
        "sepolia" => "sep",
        "base" => "base",
        "basesepolia" => "base-sep",
        _ => network,
    };
    format!("https://app.safe.global/{prefix}:{address}")
}

/// The hierarchy as printed by `multisig hierarchy`.
pub fn hierarchy_text() -> String {
    let mut out = String::new();
    for level in MultisigLevel::ALL {
        out.push_str(&format!("{level}\n"));
        out.push_str(&format!("Purpose: {}\n", level.purpose()));
        out.push_str("Permissions:\n");
        for permission in level.permissions() {
            out.push_str(&format!("  - {permission}\n"));
        }
        for note in level.notes() {
            out.push_str(&format!("{note}\n"));
        }
        out.push('\n');
    }
    out
}
