//! CLI entrypoint: wires the C1-C8 components behind the five top-level
//! verbs of §6.

mod wandb;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use bx_artifact::archive::{self, Role};
use bx_cluster::{ClusterClient, KubectlClient};
use bx_connpool::{ConnectionPool, Connector};
use bx_profile::sweep::{self, PairAddressing, SweepSpec};
use bx_profile::template::LuaPktgenTemplater;
use bx_rexec::{RemoteShell, RexecError, SshShell};
use bx_types::{CancelToken, Config, FlowMode};

#[derive(Parser)]
#[command(name = "bx", version, about = "Distributed DPDK benchmark orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit per-pair profile artifacts for a sweep of (flows, rate, pkt-size, mode).
    GenerateFlow(GenerateFlowArgs),
    /// Run one experiment for a named profile.
    StartGenerator(StartGeneratorArgs),
    /// Check one archive against the §4.8 schema.
    ValidateNpz(ValidateNpzArgs),
    /// Walk the results tree, report per-Experiment integrity, optionally purge.
    Sanity(SanityArgs),
    /// Forward archives to a metrics sink.
    UploadWandb(UploadWandbArgs),
}

#[derive(Parser)]
struct GenerateFlowArgs {
    #[arg(long = "flows-dir")]
    flows_dir: PathBuf,
    #[arg(long = "flows", value_delimiter = ',')]
    flows: Vec<u32>,
    #[arg(long = "rates", value_delimiter = ',')]
    rates: Vec<u8>,
    #[arg(long = "pkt-sizes", value_delimiter = ',')]
    pkt_sizes: Vec<u32>,
    #[arg(long = "modes", value_delimiter = ',')]
    modes: Vec<String>,
    #[arg(long = "pair-dir")]
    pair_dir: String,
    #[arg(long = "src-mac")]
    src_mac: String,
    #[arg(long = "dst-mac")]
    dst_mac: String,
    #[arg(long = "base-src-ip")]
    base_src_ip: String,
    #[arg(long = "base-dst-ip")]
    base_dst_ip: String,
    #[arg(long = "base-src-port", default_value_t = 1024)]
    base_src_port: u16,
    #[arg(long = "base-dst-port", default_value_t = 2048)]
    base_dst_port: u16,
}

#[derive(Parser)]
struct StartGeneratorArgs {
    #[arg(long)]
    profile: String,
    #[arg(long)]
    duration: u64,
    #[arg(long = "sample-interval")]
    sample_interval: u64,
    #[arg(long = "sample-count")]
    sample_count: Option<u32>,
    #[arg(long, default_value_t = 1024)]
    txd: u32,
    #[arg(long, default_value_t = 1024)]
    rxd: u32,
    #[arg(long = "tx-socket-mem", default_value_t = 2048)]
    tx_socket_mem: u32,
    #[arg(long = "rx-socket-mem", default_value_t = 2048)]
    rx_socket_mem: u32,
    #[arg(long = "warmup-duration", default_value_t = 5)]
    warmup_duration: u64,
    #[arg(long = "control-port", default_value_t = 22022)]
    control_port: u16,
    #[arg(long = "rx-num-core")]
    rx_num_core: Option<u32>,
    #[arg(long = "tx-num-core")]
    tx_num_core: Option<u32>,
    #[arg(long = "nic-name")]
    nic_name: String,
    #[arg(long = "default-username", default_value = "root")]
    default_username: String,
    #[arg(long = "default-password", default_value = "")]
    default_password: String,
    #[arg(long = "skip-copy")]
    skip_copy: bool,
    #[arg(long = "skip-testpmd")]
    skip_testpmd: bool,
    #[arg(long)]
    latency: bool,
    #[arg(long = "profile-dir")]
    profile_dir: PathBuf,
    #[arg(long = "results-dir")]
    results_dir: PathBuf,
    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Parser)]
struct ValidateNpzArgs {
    path: PathBuf,
    #[arg(long, value_enum)]
    role: RoleArg,
}

#[derive(Clone, clap::ValueEnum)]
enum RoleArg {
    Tx,
    Rx,
}

#[derive(Parser)]
struct SanityArgs {
    #[arg(long = "results-dir")]
    results_dir: PathBuf,
    #[arg(long)]
    purge: bool,
}

#[derive(Parser)]
struct UploadWandbArgs {
    path: PathBuf,
    #[arg(long)]
    endpoint: String,
    #[arg(long = "experiment-id")]
    experiment_id: String,
}

struct SshConnector {
    username: String,
    password: String,
}

impl Connector for SshConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RexecError> {
        let shell = SshShell::connect(host, 22, &self.username, &self.password)?;
        Ok(Box::new(shell))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Abort) => {
            log::warn!("aborted by signal");
            ExitCode::from(130)
        }
        Err(CliError::Validation(msg)) => {
            log::error!("validation failure: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::TopologyMismatch(msg)) => {
            log::error!("topology mismatch: {msg}");
            ExitCode::from(2)
        }
        Err(CliError::Other(e)) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

enum CliError {
    Abort,
    Validation(String),
    TopologyMismatch(String),
    Other(anyhow::Error),
}

impl From<bx_artifact::SanityError> for CliError {
    fn from(e: bx_artifact::SanityError) -> Self {
        CliError::Other(e.into())
    }
}

impl From<bx_artifact::metadata::MetadataError> for CliError {
    fn from(e: bx_artifact::metadata::MetadataError) -> Self {
        CliError::Other(e.into())
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::GenerateFlow(args) => run_generate_flow(args),
        Command::StartGenerator(args) => run_start_generator(args).await,
        Command::ValidateNpz(args) => run_validate_npz(args),
        Command::Sanity(args) => run_sanity(args),
        Command::UploadWandb(args) => run_upload_wandb(args).await,
    }
}

fn run_generate_flow(args: GenerateFlowArgs) -> Result<(), CliError> {
    let modes = args
        .modes
        .iter()
        .map(|m| m.parse::<FlowMode>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CliError::Validation(e.to_string()))?;

    let spec = SweepSpec {
        flow_counts: args.flows,
        rates: args.rates,
        pkt_sizes: args.pkt_sizes,
        modes,
    };
    let addressing = PairAddressing {
        pair_dir: args.pair_dir,
        src_mac: args.src_mac,
        dst_mac: args.dst_mac,
        base_src_ip: args.base_src_ip,
        base_dst_ip: args.base_dst_ip,
        base_src_port: args.base_src_port,
        base_dst_port: args.base_dst_port,
    };

    let written = sweep::generate_flow(&LuaPktgenTemplater, &[addressing], &spec, &args.flows_dir)
        .map_err(|e| CliError::Validation(e.to_string()))?;
    log::info!("wrote {} profile files under {:?}", written.len(), args.flows_dir);
    Ok(())
}

async fn run_start_generator(args: StartGeneratorArgs) -> Result<(), CliError> {
    let config = Config {
        profile: args.profile,
        duration_secs: args.duration,
        sample_interval_secs: args.sample_interval,
        sample_count: args.sample_count,
        txd: args.txd,
        rxd: args.rxd,
        tx_socket_mem: args.tx_socket_mem,
        rx_socket_mem: args.rx_socket_mem,
        warmup_duration_secs: args.warmup_duration,
        control_port: args.control_port,
        rx_num_core: args.rx_num_core,
        tx_num_core: args.tx_num_core,
        nic_name: args.nic_name,
        default_username: args.default_username,
        default_password: args.default_password,
        skip_copy: args.skip_copy,
        skip_testpmd: args.skip_testpmd,
        latency: args.latency,
        results_dir: args.results_dir,
    };
    config.validate().map_err(|e| CliError::Validation(e.to_string()))?;

    let cluster: Arc<dyn ClusterClient> = Arc::new(KubectlClient::new(args.namespace));
    let connector = SshConnector {
        username: config.default_username.clone(),
        password: config.default_password.clone(),
    };
    let pool = Arc::new(ConnectionPool::new(connector));
    let cancel = CancelToken::new();

    let sigint_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("SIGINT received, signalling cancellation");
            sigint_cancel.cancel();
        }
    });

    let timestamp = chrono::Utc::now().timestamp();
    let timing = bx_controller::Timing::default();

    let outcome = bx_controller::run_experiment(cluster, pool, &config, &args.profile_dir, timestamp, &timing, cancel.clone()).await;

    match outcome {
        Ok(outcome) => {
            log::info!(
                "experiment {} complete, {} pair(s) under {:?}",
                outcome.experiment_id.as_str(),
                outcome.pairs.len(),
                outcome.results_dir
            );
            Ok(())
        }
        Err(bx_controller::ControllerError::Abort) => Err(CliError::Abort),
        Err(e @ bx_controller::ControllerError::Topology(_)) => Err(CliError::TopologyMismatch(e.to_string())),
        Err(e) => Err(CliError::Other(e.into())),
    }
}

fn run_validate_npz(args: ValidateNpzArgs) -> Result<(), CliError> {
    let name = args
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CliError::Validation(format!("{:?} has no file name", args.path)))?;
    archive::ArchiveName::parse(name).map_err(|e| CliError::Validation(e.to_string()))?;

    let series = archive::read_npz(&args.path).map_err(|e| CliError::Validation(e.to_string()))?;
    let role = match args.role {
        RoleArg::Tx => Role::Tx,
        RoleArg::Rx => Role::Rx,
    };
    archive::validate_schema(role, &series).map_err(|e| CliError::Validation(e.to_string()))?;
    log::info!("{:?} is a valid {role} archive", args.path);
    Ok(())
}

fn run_sanity(args: SanityArgs) -> Result<(), CliError> {
    let reports = bx_artifact::sanity::walk(&args.results_dir)?;
    for report in &reports {
        if report.valid {
            println!("{}: OK", report.experiment_id);
        } else {
            println!("{}: INVALID ({})", report.experiment_id, report.missing.join(", "));
        }
    }

    if args.purge {
        let removed = bx_artifact::sanity::purge(&args.results_dir, &reports)?;
        log::info!("purged {removed} invalid experiment(s)");
    }

    if reports.iter().any(|r| !r.valid) && !args.purge {
        return Err(CliError::Validation("one or more experiments failed sanity".to_string()));
    }
    Ok(())
}

async fn run_upload_wandb(args: UploadWandbArgs) -> Result<(), CliError> {
    use bx_artifact::metadata;
    use wandb::Sink;

    let fields = if args.path.is_dir() {
        metadata::read(&args.path.join("metadata.txt"))?
    } else {
        metadata::read(&args.path)?
    };

    let sink = wandb::HttpSink::new(args.endpoint);
    sink.upload(&args.experiment_id, &fields).await.map_err(|e| CliError::Other(e.into()))?;
    log::info!("uploaded metadata for experiment {} to wandb sink", args.experiment_id);
    Ok(())
}
