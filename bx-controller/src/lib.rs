//! C7 Experiment Controller: composes C1–C6 under one profile, enforces
//! the phase ordering of §4.7/§5, and drives cleanup on both the success
//! and the abort path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bx_artifact::layout::{self, PairArtifactInputs, PairArtifactResult};
use bx_cluster::ClusterClient;
use bx_connpool::{ConnectionPool, Connector};
use bx_generator::{GeneratorDriver, GeneratorError, GeneratorParams, SamplingSummary};
use bx_receiver::{ReceiverDriver, ReceiverError};
use bx_types::core_assignment::CoreAssignment;
use bx_types::{CancelToken, Config, ExperimentId, Pair};
use thiserror::Error;

/// The generator's own process name, matched against by the belt-and-braces
/// force-kill on abort (§5).
const GENERATOR_PROCESS_NAME: &str = "pktgen";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("topology resolution failed: {0}")]
    Topology(#[from] bx_topology::TopologyError),
    #[error("profile distribution failed: {0}")]
    Distribute(#[from] bx_profile::DistributeError),
    #[error("artifact write failed: {0}")]
    Artifact(#[from] bx_artifact::ArtifactError),
    #[error("experiment aborted by signal")]
    Abort,
}

/// Why a Pair did not make it to the artifact-collection phase (§7:
/// `EInsufficientCores`, `EReceiverNotLive`; a launch failure is recorded
/// rather than propagated, per I5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairFailure {
    ReceiverInsufficientCores(String),
    ReceiverNotLive(String),
    GeneratorInsufficientCores(String),
    GeneratorLaunchFailed(String),
}

/// One Pair's outcome: either it reached artifact collection (possibly with
/// one or both archives suppressed by `EMissingSeries`), or it was skipped
/// for a local, non-fatal reason.
#[derive(Debug)]
pub enum PairOutcome {
    Collected(PairArtifactResult),
    Skipped { pair: Pair, reason: PairFailure },
}

#[derive(Debug)]
pub struct ExperimentOutcome {
    pub experiment_id: ExperimentId,
    pub results_dir: PathBuf,
    pub pairs: Vec<PairOutcome>,
}

/// Durations the Controller doesn't take straight from `Config` because
/// they aren't user-tunable options (§4.7/§5), broken out so tests can
/// shrink them instead of sleeping for real minutes.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Step 9: how long the Controller waits after generators return before
    /// stopping receivers, so in-flight packets land.
    pub drain_window: Duration,
    /// The Hypervisor Sampler's per-tick cadence.
    pub hv_interval: Duration,
    /// Added to the generator runtime for the Sampler's total run length
    /// (I6).
    pub hv_grace: Duration,
    pub warmup_duration: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            drain_window: Duration::from_secs(60),
            hv_interval: Duration::from_secs(5),
            hv_grace: Duration::from_secs(30),
            warmup_duration: Duration::from_secs(5),
        }
    }
}

struct LaunchedPair {
    pair: Pair,
    tx_assignment: CoreAssignment,
    rx_cores: bx_receiver::ReceiverCores,
}

enum PairLaunchResult {
    Launched(LaunchedPair),
    Failed { pair: Pair, reason: PairFailure },
}

/// Runs one Experiment end to end for `config`. `timestamp` is seconds
/// since the epoch, supplied by the caller (the CLI reads the clock once at
/// startup) so tests can drive `ExperimentId` derivation deterministically.
#[allow(clippy::too_many_arguments)]
pub async fn run_experiment<C: Connector + 'static>(
    cluster: Arc<dyn ClusterClient>,
    pool: Arc<ConnectionPool<C>>,
    config: &Config,
    profile_dir: &Path,
    timestamp: i64,
    timing: &Timing,
    cancel: CancelToken,
) -> Result<ExperimentOutcome, ControllerError> {
    let experiment_id = ExperimentId::derive(&config.profile, timestamp);
    let timestamp_token = chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y%m%d_%H%M%S")
        .to_string();

    log::info!("experiment {experiment_id} starting for profile {}", config.profile);

    let (pairs, hypervisor_map) = bx_topology::resolve(cluster.clone()).await?;

    // Step 3: hypervisor samplers start in the background, sized to the
    // generator runtime plus a grace window (§4.7 point 3, I6).
    let run_for = Duration::from_secs(config.duration_secs) + timing.hv_grace;
    let mut hv_tasks = tokio::task::JoinSet::new();
    for host in bx_hvsampler::unique_hypervisors(&hypervisor_map) {
        let pool = pool.clone();
        let nic_name = config.nic_name.clone();
        let out = results_dir(config).join(experiment_id.as_str()).join(format!("{host}.csv"));
        let interval = timing.hv_interval;
        let cancel = cancel.clone();
        hv_tasks.spawn(async move {
            if let Some(parent) = out.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = bx_hvsampler::sample_hypervisor(pool, host.clone(), nic_name, out, interval, run_for, cancel).await {
                log::warn!("hypervisor sampler for {host} exited with error: {e}");
            }
        });
    }

    if cancel.is_cancelled() {
        return abort(cluster.as_ref(), pool.as_ref(), &[], hv_tasks).await;
    }

    // Step 4: profile distribution, one archive per TX workload.
    bx_profile::distribute(cluster.clone(), &pairs, profile_dir, config.skip_copy).await?;

    if cancel.is_cancelled() {
        return abort(cluster.as_ref(), pool.as_ref(), &[], hv_tasks).await;
    }

    // Step 5: receivers, launched sequentially — RX must be ready before
    // the matching TX is started.
    let mut receiver_drivers: Vec<(Pair, Option<ReceiverDriver>, PairFailure)> = Vec::new();
    for pair in &pairs {
        let mut driver = ReceiverDriver::new(pair.rx().name());
        match launch_receiver(&mut driver, cluster.as_ref(), pair, config, timing).await {
            Ok(()) => receiver_drivers.push((pair.clone(), Some(driver), PairFailure::ReceiverNotLive(String::new()))),
            Err(reason) => receiver_drivers.push((pair.clone(), None, reason)),
        }
        if cancel.is_cancelled() {
            let live_pods: Vec<String> = receiver_drivers
                .iter()
                .filter_map(|(_, d, _)| d.as_ref().map(|d| d.pod().to_string()))
                .collect();
            return abort(cluster.as_ref(), pool.as_ref(), &live_pods, hv_tasks).await;
        }
    }

    // Step 6: one kernel-cmdline read per distinct node.
    let mut cmdline_by_node: BTreeMap<String, String> = BTreeMap::new();
    for pair in &pairs {
        for workload in [pair.tx(), pair.rx()] {
            cmdline_by_node
                .entry(workload.host_node().to_string())
                .or_insert_with(|| read_cmdline(cluster.as_ref(), workload.name()));
        }
    }

    // Step 7 (generator support file) is subsumed by the profile bundle
    // distributed in step 4 — the sampling helper travels in the same tar.

    // Step 8: generators, fanned out one task per TX workload.
    let mut gen_tasks = tokio::task::JoinSet::new();
    for (pair, receiver, failure) in receiver_drivers {
        let cluster = cluster.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        let session = config.profile.clone();
        gen_tasks.spawn(async move {
            let Some(mut receiver_driver) = receiver else {
                return (
                    pair.clone(),
                    PairLaunchResult::Failed { pair: pair.clone(), reason: failure },
                    None::<ReceiverDriver>,
                    None::<SamplingSummary>,
                );
            };

            let mut driver = GeneratorDriver::new(pair.tx().name(), session.clone());
            let params = generator_params(&config, &pair);
            match driver.prepare(pair.tx().cores(), config.latency, config.tx_num_core) {
                Ok(()) => {}
                Err(GeneratorError::CoreSplit { pod, .. }) => {
                    return (
                        pair.clone(),
                        PairLaunchResult::Failed { pair: pair.clone(), reason: PairFailure::GeneratorInsufficientCores(pod) },
                        Some(receiver_driver),
                        None,
                    );
                }
                Err(_) => unreachable!("prepare only returns CoreSplit"),
            }

            if let Err(e) = driver.launch(cluster.as_ref(), &params) {
                return (
                    pair.clone(),
                    PairLaunchResult::Failed { pair: pair.clone(), reason: PairFailure::GeneratorLaunchFailed(format!("{e}")) },
                    Some(receiver_driver),
                    None,
                );
            }

            let summary = driver.run_sampling(cluster.clone(), cancel, &params).await;
            driver.abort(cluster.as_ref());
            (
                pair.clone(),
                PairLaunchResult::Launched(LaunchedPair {
                    pair: pair.clone(),
                    tx_assignment: driver.assignment().cloned().expect("prepare succeeded"),
                    rx_cores: receiver_driver.cores().expect("receiver assigned cores").clone(),
                }),
                Some(receiver_driver),
                Some(summary),
            )
        });
    }

    let mut launched: Vec<(LaunchedPair, SamplingSummary)> = Vec::new();
    let mut failed: Vec<(Pair, PairFailure)> = Vec::new();
    let mut receivers_to_stop: Vec<ReceiverDriver> = Vec::new();

    while let Some(joined) = gen_tasks.join_next().await {
        let (pair, result, receiver, summary) = joined.expect("generator task panicked");
        if let Some(r) = receiver {
            receivers_to_stop.push(r);
        }
        match result {
            PairLaunchResult::Launched(lp) => launched.push((lp, summary.expect("launched carries a summary"))),
            PairLaunchResult::Failed { reason, .. } => failed.push((pair, reason)),
        }
    }

    // Step 9: drain window so in-flight packets are accounted (I4).
    tokio::time::sleep(timing.drain_window).await;

    if cancel.is_cancelled() {
        let live_pods: Vec<String> = receivers_to_stop.iter().map(|d| d.pod().to_string()).collect();
        return abort(cluster.as_ref(), pool.as_ref(), &live_pods, hv_tasks).await;
    }

    // Step 10: stop every receiver that is still running.
    for driver in &mut receivers_to_stop {
        if driver.state() == bx_receiver::State::Running {
            if let Err(e) = driver.stop(cluster.as_ref()) {
                log::warn!("stopping receiver {} failed: {e}", driver.pod());
            }
        }
    }

    // Step 11: artifact collection for every successfully-launched Pair.
    let results_dir = results_dir(config);
    let mut outcomes: Vec<PairOutcome> = Vec::new();
    for (lp, summary) in launched {
        let outcome = collect_artifacts(
            cluster.as_ref(),
            &results_dir,
            &experiment_id,
            &lp,
            &summary,
            config,
            &cmdline_by_node,
            &timestamp_token,
        )?;
        outcomes.push(PairOutcome::Collected(outcome));
    }
    for (pair, reason) in failed {
        outcomes.push(PairOutcome::Skipped { pair, reason });
    }

    // Step 12: join samplers, close the pool.
    while hv_tasks.join_next().await.is_some() {}
    pool.close_all();

    Ok(ExperimentOutcome {
        experiment_id,
        results_dir,
        pairs: outcomes,
    })
}

fn results_dir(config: &Config) -> PathBuf {
    config.results_dir.clone()
}

async fn launch_receiver(
    driver: &mut ReceiverDriver,
    cluster: &dyn ClusterClient,
    pair: &Pair,
    config: &Config,
    timing: &Timing,
) -> Result<(), PairFailure> {
    driver
        .assign_cores(pair.rx().cores(), config.rx_num_core)
        .map_err(|_| PairFailure::ReceiverInsufficientCores(pair.rx().name().to_string()))?;

    let peer_mac = pair.tx().port_mac().unwrap_or_default();
    match driver.warmup(cluster, peer_mac, timing.warmup_duration) {
        Ok(()) => {}
        Err(ReceiverError::WarmupFailed { pod, code }) => {
            log::warn!("warm-up on {pod} exited {code}, continuing (EWarmupFailed is non-fatal)");
        }
        Err(e) => {
            log::warn!("warm-up on {} failed: {e}", pair.rx().name());
        }
    }

    let total_timeout = Duration::from_secs(config.duration_secs + 2 * config.sample_interval_secs + 60);
    driver
        .start(cluster, total_timeout)
        .await
        .map_err(|_| PairFailure::ReceiverNotLive(pair.rx().name().to_string()))
}

fn generator_params(config: &Config, _pair: &Pair) -> GeneratorParams {
    GeneratorParams {
        profile_path: format!("/{}", config.profile),
        duration_secs: config.duration_secs,
        sample_interval_secs: config.sample_interval_secs,
        sample_count: config.effective_sample_count(),
        txd: config.txd,
        rxd: config.rxd,
        tx_socket_mem: config.tx_socket_mem,
        control_port: config.control_port,
        latency: config.latency,
        tx_num_core: config.tx_num_core,
    }
}

fn read_cmdline(cluster: &dyn ClusterClient, pod: &str) -> String {
    match cluster.exec(pod, &["cat", "/proc/cmdline"]) {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        _ => String::new(),
    }
}

fn read_remote_file(cluster: &dyn ClusterClient, pod: &str, path: &str) -> String {
    match cluster.exec(pod, &["cat", path]) {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).to_string(),
        _ => String::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_artifacts(
    cluster: &dyn ClusterClient,
    results_dir: &Path,
    experiment_id: &ExperimentId,
    lp: &LaunchedPair,
    summary: &SamplingSummary,
    config: &Config,
    cmdline_by_node: &BTreeMap<String, String>,
    timestamp_token: &str,
) -> Result<PairArtifactResult, ControllerError> {
    let profile = bx_types::Profile::parse(&config.profile).unwrap_or_else(|_| {
        bx_types::Profile::parse("profile_0_flows_pkt_size_0B_0_rate_s.lua").expect("fallback profile name parses")
    });

    let tx = lp.pair.tx();
    let rx = lp.pair.rx();

    let warmup_log_contents = read_remote_file(cluster, rx.name(), bx_receiver::WARMUP_LOG_PATH);
    let warmup_log = if warmup_log_contents.is_empty() { None } else { Some(warmup_log_contents) };
    let rx_stats_log = read_remote_file(cluster, rx.name(), "/output/stats.log");
    let tx_port_rate_csv = read_remote_file(cluster, tx.name(), "/tmp/port_rate_stats.csv");
    let tx_port_csv = read_remote_file(cluster, tx.name(), "/tmp/port_stats.csv");

    let mut metadata = config.metadata_fields();
    metadata.insert("expid".to_string(), experiment_id.as_str().to_string());
    metadata.insert("timestamp".to_string(), timestamp_token.to_string());
    metadata.insert("tx_pod".to_string(), tx.name().to_string());
    metadata.insert("rx_pod".to_string(), rx.name().to_string());
    metadata.insert("tx_node".to_string(), tx.host_node().to_string());
    metadata.insert("rx_node".to_string(), rx.host_node().to_string());
    if let Some(mac) = tx.port_mac() {
        metadata.insert("tx_mac".to_string(), mac.to_string());
    }
    if let Some(mac) = rx.port_mac() {
        metadata.insert("rx_mac".to_string(), mac.to_string());
    }
    metadata.insert("tx_numa".to_string(), lp.tx_assignment.main().to_string());
    metadata.insert("rx_numa".to_string(), lp.rx_cores.main().to_string());
    if let Some(esxi) = tx.hypervisor() {
        metadata.insert("tx_esxi".to_string(), esxi.to_string());
    }
    if let Some(esxi) = rx.hypervisor() {
        metadata.insert("rx_esxi".to_string(), esxi.to_string());
    }
    if let Some(cmdline) = cmdline_by_node.get(tx.host_node()) {
        if !cmdline.is_empty() {
            metadata.insert("tx_cmdline".to_string(), cmdline.clone());
        }
    }
    if let Some(cmdline) = cmdline_by_node.get(rx.host_node()) {
        if !cmdline.is_empty() {
            metadata.insert("rx_cmdline".to_string(), cmdline.clone());
        }
    }
    if summary.generator_exited_early {
        metadata.insert("generator_exited_early".to_string(), "true".to_string());
    }

    let result = layout::write_pair_artifacts(
        results_dir,
        PairArtifactInputs {
            experiment_id,
            pair: &lp.pair,
            profile: &profile,
            metadata,
            warmup_log: warmup_log.as_deref(),
            rx_stats_log: &rx_stats_log,
            tx_port_rate_csv: &tx_port_rate_csv,
            tx_port_csv: &tx_port_csv,
            tx_cores: lp.tx_assignment.tx_cores().len() as u32,
            rx_cores: lp.rx_cores.cores().len() as u32,
            timestamp: timestamp_token,
        },
    )?;
    Ok(result)
}

/// Belt-and-braces abort (§5, P7): kill every TX workload's multiplexer
/// session and generator process by name, delete `/tmp` scratch files,
/// signal receivers, join samplers to their deadline, close the pool. No
/// partial archive is produced past this point.
async fn abort<C: Connector + 'static>(
    cluster: &dyn ClusterClient,
    pool: &ConnectionPool<C>,
    receivers: &[String],
    mut hv_tasks: tokio::task::JoinSet<()>,
) -> Result<ExperimentOutcome, ControllerError> {
    log::warn!("abort signal observed, tearing down");

    if let Ok(pods) = cluster.list_pods() {
        for pod in pods.iter().filter(|p| p.name.starts_with("tx")) {
            let _ = cluster.exec(&pod.name, &["tmux", "kill-server"]);
            let _ = cluster.exec(&pod.name, &["pkill", "-9", "-f", GENERATOR_PROCESS_NAME]);
            let _ = cluster.exec(&pod.name, &["sh", "-c", "rm -rf /tmp/*"]);
        }
    }

    for pod in receivers {
        let _ = cluster.exec(pod, &["pkill", "-SIGINT", "-f", "dpdk-testpmd"]);
    }

    while hv_tasks.join_next().await.is_some() {}
    pool.close_all();

    Err(ControllerError::Abort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_cluster::fake::FakeClusterClient;
    use bx_cluster::PodInfo;
    use bx_rexec::fake::FakeShell;
    use bx_rexec::{RemoteOutput, RexecError};

    struct NullConnector;
    impl Connector for NullConnector {
        fn connect(&self, host: &str) -> Result<Box<dyn bx_rexec::RemoteShell>, RexecError> {
            Ok(Box::new(FakeShell::new(host, vec![RemoteOutput { exit_status: 0, stdout: String::new(), stderr: String::new() }])))
        }
    }

    fn config(results_dir: &Path) -> Config {
        Config {
            profile: "profile_10_flows_pkt_size_512B_50_rate_s.lua".to_string(),
            duration_secs: 10,
            sample_interval_secs: 2,
            sample_count: Some(2),
            txd: 1024,
            rxd: 1024,
            tx_socket_mem: 2048,
            rx_socket_mem: 2048,
            warmup_duration_secs: 1,
            control_port: 22022,
            rx_num_core: None,
            tx_num_core: None,
            nic_name: "vmnic0".to_string(),
            default_username: "root".to_string(),
            default_password: String::new(),
            skip_copy: true,
            skip_testpmd: false,
            latency: false,
            results_dir: results_dir.to_path_buf(),
        }
    }

    fn timing() -> Timing {
        Timing {
            drain_window: Duration::from_millis(1),
            hv_interval: Duration::from_millis(1),
            hv_grace: Duration::from_millis(1),
            warmup_duration: Duration::from_millis(1),
        }
    }

    fn seeded_cluster() -> FakeClusterClient {
        let client = FakeClusterClient::new(vec![
            PodInfo { name: "tx0".to_string(), node_name: "node-a".to_string() },
            PodInfo { name: "rx0".to_string(), node_name: "node-b".to_string() },
        ]);
        for pod in ["tx0", "rx0"] {
            client.stub_exec(pod, &["pgrep", "-f", "pktgen"], 1, b"", b"");
            client.stub_exec(pod, &["sh", "-c", "dpdk-testpmd -a $PCIDEVICE_INTEL_COM_DPDK --"], 0, b"port 0 MAC: 02:00:00:00:00:01\n", b"");
            client.stub_exec(pod, &["numactl", "-s"], 0, b"physcpubind: 0 1 2 3 4\n", b"");
            client.stub_exec(pod, &["cat", "/proc/cmdline"], 0, b"BOOT_IMAGE=/vmlinuz\n", b"");
        }
        client.stub_exec("rx0", &["pkill", "-SIGINT", "-f", "dpdk-testpmd"], 0, b"", b"");
        client
    }

    #[tokio::test(start_paused = true)]
    async fn single_pair_insufficient_tx_cores_is_skipped_not_fatal() {
        let client = seeded_cluster();
        // rx0's liveness check is stubbed so the receiver actually reaches
        // Running; the skip must come from the generator's core split, not
        // from an un-stubbed health check incidentally failing first.
        client.stub_exec("rx0", &["pgrep", "-f", "dpdk-testpmd"], 0, b"4242\n", b"");
        client.stub_exec(
            "rx0",
            &["sh", "-c", "test -s /output/stats.log && echo OK || echo FAIL"],
            0,
            b"OK\n",
            b"",
        );
        let cluster: Arc<dyn ClusterClient> = Arc::new(client);
        let pool = Arc::new(ConnectionPool::new(NullConnector));
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        // Force an insufficient-core failure by requesting more tx cores
        // than exist after the split (5 cores split leaves 2 tx cores).
        cfg.tx_num_core = Some(99);

        let outcome = run_experiment(cluster, pool, &cfg, dir.path(), 1_700_000_000, &timing(), CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.pairs.len(), 1);
        assert!(matches!(
            outcome.pairs[0],
            PairOutcome::Skipped { reason: PairFailure::GeneratorInsufficientCores(_), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_distribution_aborts_without_archive() {
        let client = seeded_cluster();
        let cluster: Arc<dyn ClusterClient> = Arc::new(client);
        let pool = Arc::new(ConnectionPool::new(NullConnector));
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = run_experiment(cluster, pool, &cfg, dir.path(), 1_700_000_000, &timing(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Abort));
        assert!(!dir.path().join("44d72c38").exists());
    }
}
