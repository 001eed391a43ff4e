//! Per-chain deployment runs: plan files, the orchestrator and the run lock.

mod lock;
mod orchestrator;
mod plan;

pub use lock::{default_lock_dir, LockError, RunLock};
pub use orchestrator::{DeploymentOrchestrator, DeploymentOutcome, OrchestratorError};
pub use plan::{
    CallCheck, CodeSource, DeploymentPlan, FactoryConfig, FactorySource, OrchestratorConfig,
    PlanError, PostDeployCall, ResolvedRole, RoleSpec, DEFAULT_GAS_LIMIT,
};
