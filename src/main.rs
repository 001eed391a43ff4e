//! create2_deploy CLI
//!
//! Usage:
//!   create2_deploy salt --namespace 402.vln.gg-v1-router --chain-id 8453
//!   create2_deploy deploy plan.json --rpc-url https://mainnet.base.org --private-key-file key.hex
//!   create2_deploy deploy plan.json --simulate            # dry run on an in-memory chain
//!   create2_deploy verify --dir deployments
//!   create2_deploy multisig validate admin.json

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use create2_deploy::chain::{ChainClient, ContractBehavior, RpcClient, SimulatedChain};
use create2_deploy::config::{
    ChainArgs, Cli, Command, DeployArgs, MultisigCommand, MultisigCreateArgs, MultisigPlan,
    PredictArgs, SignerArgs, VerifyArgs,
};
use create2_deploy::crypto::{code_hash, predict_address, Address, Keypair};
use create2_deploy::deploy::{
    default_lock_dir, DeploymentOrchestrator, DeploymentPlan, FactoryConfig, OrchestratorConfig,
    RunLock,
};
use create2_deploy::multisig::{
    dashboard_url, default_salt_nonce, hierarchy_text, SafeContracts, SafeCreator,
};
use create2_deploy::record::{
    validate_network, DeploymentRecord, MultisigDetails, MultisigRecord, RecordStore, RoleStatus, TransactionRef,
};
use create2_deploy::signer::{
    EmulatedConnector, NoTransport, SignerBackend, SignerProvider, TransactionSigner,
};
use create2_deploy::verify::{CrossChainVerifier, VerificationReport};

/// Creation code the simulator uses for pre-installed system contracts.
const SIMULATED_FACTORY_CODE: &[u8] = b"simulated-create2-factory";
const SIMULATED_SAFE_PROXY_CODE: &[u8] = b"simulated-safe-proxy";

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_filter()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Set up ctrl-c handler
    let cancel = Arc::new(AtomicBool::new(false));
    ctrlc_handler(Arc::clone(&cancel));

    match run(cli, cancel) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Runs one command; `Ok(false)` means it completed with a negative result.
fn run(cli: Cli, cancel: Arc<AtomicBool>) -> anyhow::Result<bool> {
    match cli.command {
        Command::Salt(args) => {
            println!("{}", args.salt());
            Ok(true)
        }
        Command::Predict(args) => predict(&args),
        Command::Deploy(args) => deploy(args, cancel),
        Command::Verify(args) => verify(&args),
        Command::Multisig(MultisigCommand::Validate { config }) => {
            let plan = MultisigPlan::load(&config)?;
            let report = plan.spec.validate();
            if report.valid {
                println!("Configuration is valid");
            } else {
                println!("Configuration is invalid:");
                for error in &report.errors {
                    println!("  - {}", error);
                }
            }
            Ok(report.valid)
        }
        Command::Multisig(MultisigCommand::Create(args)) => create_multisig(args, cancel),
        Command::Multisig(MultisigCommand::Show {
            level,
            network,
            dir,
        }) => {
            let (path, record) = RecordStore::new(dir).latest_multisig(level, network.as_deref())?;
            println!("Record:    {}", path.display());
            println!("Name:      {}", record.multisig.name);
            println!("Address:   {}", record.multisig.address);
            println!(
                "Threshold: {}-of-{}",
                record.multisig.threshold,
                record.multisig.owners.len()
            );
            println!("Dashboard: {}", dashboard_url(&record.multisig.address, &record.network));
            Ok(true)
        }
        Command::Multisig(MultisigCommand::Hierarchy) => {
            print!("{}", hierarchy_text());
            Ok(true)
        }
    }
}

fn predict(args: &PredictArgs) -> anyhow::Result<bool> {
    let salt = args.salt()?;
    let code = args.creation_code()?;
    println!("Factory:        {}", args.factory);
    println!("Salt:           {}", salt);
    println!("Init code hash: {}", code_hash(&code));
    println!("Address:        {}", predict_address(&args.factory, &salt, &code));
    Ok(true)
}

fn deploy(args: DeployArgs, cancel: Arc<AtomicBool>) -> anyhow::Result<bool> {
    let plan = DeploymentPlan::load(&args.plan)?;
    let mut config = plan.resolve()?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.chain.simulate {
        config.output_dir = config.output_dir.join("simulated");
        // dry runs never contend with live runs
        config.lock_dir = config.output_dir.clone();
    }

    let signer = acquire_signer(&args.signer, &args.chain, cancel)?;
    let chain: Box<dyn ChainClient> = if args.chain.simulate {
        Box::new(simulated_deploy_chain(&args.chain, &config, signer.address()))
    } else {
        Box::new(rpc_client(&args.chain)?)
    };

    println!("CREATE2 Deployment");
    println!("==================");
    println!("Network:   {} (chain {})", config.network, chain.chain_id()?);
    println!("Namespace: {} (nonce {})", config.namespace, config.nonce);
    if let Some(id) = config.salt_chain_id {
        println!("Salt chain id: {}", id);
    }
    println!("Deployer:  {}", signer.address());
    println!("Roles:     {}", config.roles.len());
    if args.chain.simulate {
        println!("Mode:      simulated");
    }
    println!();

    let outcome = DeploymentOrchestrator::new(chain.as_ref(), signer.as_ref(), config).run()?;
    if let Some(factory) = outcome.bootstrapped_factory {
        println!("Factory deployed at {}; pin it in the plan before rerunning", factory);
    }
    print_deployment(&outcome.record);
    println!("\nRecord written to {}", outcome.path.display());
    Ok(outcome.record.complete)
}

fn print_deployment(record: &DeploymentRecord) {
    println!("--- Deployment Summary ---");
    println!("Factory: {}", record.create2.factory);
    for (role, contract) in &record.contracts {
        let status = match contract.status {
            RoleStatus::Deployed => "deployed",
            RoleStatus::AlreadyDeployed => "already deployed",
            RoleStatus::DeployFailed => "DEPLOY FAILED",
            RoleStatus::ConfigurationFailed => "CONFIGURATION FAILED",
        };
        println!("{:<16} {}  {}", role, contract.address, status);
        if let Some(error) = &contract.error {
            println!("{:<16} error: {}", "", error);
        }
    }
    if !record.complete {
        println!("\nDeployment incomplete. Rerun with the same plan to finish.");
    }
}

fn verify(args: &VerifyArgs) -> anyhow::Result<bool> {
    let files: Vec<(PathBuf, DeploymentRecord)> = if !args.files.is_empty() {
        args.files
            .iter()
            .map(|path| RecordStore::load_deployment(path).map(|r| (path.clone(), r)))
            .collect::<Result<_, _>>()?
    } else if args.latest_per_network {
        RecordStore::new(&args.dir).load_latest_deployments()?
    } else {
        RecordStore::new(&args.dir).load_deployments()?
    };

    println!("Cross-Chain Verification");
    println!("========================");
    for (i, (path, record)) in files.iter().enumerate() {
        let marker = if i == 0 { " (reference)" } else { "" };
        println!("{} [{}]{}", path.display(), record.network, marker);
    }
    println!("Workers: {}", args.worker_count());
    println!();

    let live = match &args.rpc_url {
        Some(url) => Some(
            RpcClient::new(url.as_str(), Duration::from_secs(2), Duration::from_secs(60))
                .context("failed to create RPC client")?,
        ),
        None => None,
    };
    let records: Vec<DeploymentRecord> = files.into_iter().map(|(_, r)| r).collect();
    let verifier = CrossChainVerifier::new(Some(args.worker_count()));
    let report = verifier.verify(&records, live.as_ref().map(|c| c as &dyn ChainClient))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.is_valid())
}

fn print_report(report: &VerificationReport) {
    match report {
        VerificationReport::CrossChain(r) => {
            println!("Reference: {} ({})", r.reference_network, r.reference_chain_id);
            for chain in &r.comparisons {
                let verdict = if chain.is_consistent() { "consistent" } else { "INCONSISTENT" };
                println!("\n{} ({}): {}", chain.network, chain.chain_id, verdict);
                for role in &chain.roles {
                    println!(
                        "  {:<16} address {:<8} bytecode {}",
                        role.role,
                        ok(role.address_match),
                        ok(role.bytecode_match)
                    );
                }
                for warning in &chain.warnings {
                    println!("  warning: {}", warning);
                }
            }
            for finding in &r.critical {
                println!(
                    "\nCRITICAL: {} on {} has the reference address {} but different bytecode",
                    finding.role, finding.network, finding.address
                );
            }
            println!("\nAddresses: {}", ok(r.address_consistent));
            println!("Bytecode:  {}", ok(r.bytecode_consistent));
        }
        VerificationReport::Live(r) => {
            println!("Live check: {} ({})", r.network, r.chain_id);
            for role in &r.roles {
                let state = match (role.code_present, role.hash_match) {
                    (false, _) => "NO CODE",
                    (true, true) => "ok",
                    (true, false) => "HASH MISMATCH",
                };
                println!("  {:<16} {}  {}", role.role, role.address, state);
            }
        }
    }
    let verdict = if report.is_valid() { "VALID" } else { "INVALID" };
    println!("\nVerdict: {}", verdict);
}

fn ok(matched: bool) -> &'static str {
    if matched {
        "ok"
    } else {
        "MISMATCH"
    }
}

fn create_multisig(args: MultisigCreateArgs, cancel: Arc<AtomicBool>) -> anyhow::Result<bool> {
    let plan = MultisigPlan::load(&args.config)?;
    let multisig = match plan.spec.validated() {
        Ok(m) => m,
        Err(report) => {
            println!("Configuration is invalid:");
            for error in &report.errors {
                println!("  - {}", error);
            }
            return Ok(false);
        }
    };
    let contracts = plan.contracts();
    validate_network(&args.network)?;

    let signer = acquire_signer(&args.signer, &args.chain, cancel)?;
    let chain: Box<dyn ChainClient> = if args.chain.simulate {
        Box::new(simulated_safe_chain(&args.chain, &contracts, signer.address()))
    } else {
        Box::new(rpc_client(&args.chain)?)
    };
    let chain_id = chain.chain_id()?;
    let (output_dir, lock_dir) = if args.chain.simulate {
        let dir = args.output_dir.join("simulated");
        (dir.clone(), dir)
    } else {
        (args.output_dir.clone(), default_lock_dir())
    };
    let _lock = RunLock::acquire(&lock_dir, chain_id, &contracts.proxy_factory)?;

    println!("Safe Multisig Creation");
    println!("======================");
    println!("{}", multisig.level);
    println!("Name:      {}", multisig.name);
    println!("Network:   {} (chain {})", args.network, chain_id);
    println!("Creator:   {}", signer.address());
    println!();

    let salt_nonce = plan
        .salt_nonce
        .map(|n| *n.as_bytes())
        .unwrap_or_else(|| default_salt_nonce(&multisig.name, chain_id, args.nonce));
    let creator = SafeCreator::new(chain.as_ref(), contracts, args.gas_limit);
    let created = creator.create(signer.as_ref(), &multisig, &salt_nonce)?;

    let record = MultisigRecord {
        network: args.network.clone(),
        chain_id,
        timestamp: Utc::now(),
        deployer: signer.address(),
        multisig: MultisigDetails {
            level: multisig.level.number(),
            name: multisig.name.clone(),
            address: created.address,
            threshold: created.threshold,
            signers: multisig.signers.clone(),
            owners: created.owners.clone(),
        },
        gnosis_safe: contracts,
        transaction: created
            .transaction
            .map(|(hash, block_number)| TransactionRef { hash, block_number }),
    };
    let path = RecordStore::new(&output_dir).write_multisig(&record)?;

    match created.transaction {
        Some((hash, _)) => println!("Safe created:  {} (tx {})", created.address, hash),
        None => println!("Safe exists:   {}", created.address),
    }
    println!("Owners:        {}", created.owners.len());
    println!("Threshold:     {}", created.threshold);
    println!("Dashboard:     {}", dashboard_url(&created.address, &args.network));
    println!("Record:        {}", path.display());
    Ok(true)
}

fn acquire_signer(
    args: &SignerArgs,
    chain: &ChainArgs,
    cancel: Arc<AtomicBool>,
) -> anyhow::Result<Box<dyn TransactionSigner>> {
    let mut config = args.signer_config(cancel)?;
    if !chain.simulate {
        return Ok(SignerProvider::acquire(&config, &NoTransport)?);
    }
    if config.backend == SignerBackend::Software && config.software_key.is_none() {
        config.software_key = Some(Keypair::generate());
    }
    let emulator = EmulatedConnector::new(rand::random());
    Ok(SignerProvider::acquire(&config, &emulator)?)
}

fn rpc_client(args: &ChainArgs) -> anyhow::Result<RpcClient> {
    let url = args
        .rpc_url
        .as_deref()
        .context("--rpc-url is required without --simulate")?;
    Ok(RpcClient::new(url, args.poll_interval(), args.receipt_timeout())?)
}

/// In-memory chain prepared for `config`: funded deployer, factory in place,
/// and roles with check calls modelled as toggle registries.
fn simulated_deploy_chain(
    args: &ChainArgs,
    config: &OrchestratorConfig,
    deployer: Address,
) -> SimulatedChain {
    let chain = SimulatedChain::new(args.simulate_chain_id);
    chain.fund(deployer, u128::MAX / 2);
    match &config.factory {
        FactoryConfig::Existing(address) => chain.install_contract(
            *address,
            SIMULATED_FACTORY_CODE,
            ContractBehavior::Create2Factory,
            deployer,
        ),
        FactoryConfig::Bootstrap { creation_code } => {
            chain.register_behavior(creation_code, ContractBehavior::Create2Factory)
        }
    }
    for role in &config.roles {
        let toggles: Vec<(String, String)> = role
            .post_deploy
            .iter()
            .filter_map(|call| {
                call.check
                    .as_ref()
                    .map(|check| (call.signature.clone(), check.signature.clone()))
            })
            .collect();
        if !toggles.is_empty() {
            chain.register_behavior(&role.creation_code, ContractBehavior::ToggleRegistry { toggles });
        }
    }
    chain
}

fn simulated_safe_chain(args: &ChainArgs, contracts: &SafeContracts, creator: Address) -> SimulatedChain {
    let chain = SimulatedChain::new(args.simulate_chain_id);
    chain.fund(creator, u128::MAX / 2);
    chain.install_contract(
        contracts.proxy_factory,
        b"simulated-safe-proxy-factory",
        ContractBehavior::SafeProxyFactory {
            proxy_creation_code: SIMULATED_SAFE_PROXY_CODE.to_vec(),
        },
        Address::ZERO,
    );
    chain
}

fn ctrlc_handler(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            // second interrupt
            process::exit(130);
        }
        eprintln!("\nCancelling; press Ctrl+C again to exit immediately.");
    });
    if let Err(e) = result {
        warn!(error = %e, "could not install Ctrl-C handler");
    }
}
