//! C4 Generator Driver: the richest state machine in the orchestrator.
//! Computes a core split for one TX workload, launches the generator under
//! a terminal-multiplexer window, samples counters over a control channel
//! on a fixed cadence, then stops it and takes one last sample.

pub mod tmux;

use std::sync::Arc;
use std::time::Duration;

use bx_cluster::ClusterClient;
use bx_types::core_assignment::CoreAssignmentError;
use bx_types::{CancelToken, CoreAssignment};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Fresh,
    Prepared,
    Launched,
    Sampling,
    Stopping,
    Done,
    Aborted,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("core split failed for {pod:?}: {source}")]
    CoreSplit {
        pod: String,
        #[source]
        source: CoreAssignmentError,
    },
    #[error("cluster error on {pod:?}: {source}")]
    Cluster {
        pod: String,
        #[source]
        source: bx_cluster::ClusterError,
    },
    #[error("launching generator on {pod:?} failed: {stderr}")]
    LaunchFailed { pod: String, stderr: String },
}

/// One sampling-loop tick's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Sampled,
    GeneratorGone,
}

/// What the sampling loop produced, consumed by the Controller to decide
/// whether this Pair still gets an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSummary {
    pub samples_taken: u32,
    pub generator_exited_early: bool,
}

/// Parameters the generator driver needs that come from the invocation
/// `Config`, narrowed to just what this crate touches.
#[derive(Debug, Clone)]
pub struct GeneratorParams {
    pub profile_path: String,
    pub duration_secs: u64,
    pub sample_interval_secs: u64,
    pub sample_count: u32,
    pub txd: u32,
    pub rxd: u32,
    pub tx_socket_mem: u32,
    pub control_port: u16,
    pub latency: bool,
    pub tx_num_core: Option<u32>,
}

pub struct GeneratorDriver {
    pod: String,
    session: String,
    state: State,
    assignment: Option<CoreAssignment>,
}

impl GeneratorDriver {
    pub fn new(pod: impl Into<String>, session: impl Into<String>) -> Self {
        GeneratorDriver {
            pod: pod.into(),
            session: session.into(),
            state: State::Fresh,
            assignment: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn assignment(&self) -> Option<&CoreAssignment> {
        self.assignment.as_ref()
    }

    /// Computes the core split from the workload's reported allowed cores.
    /// `tx_num_core`, if set, is honored by truncating the computed tx-core
    /// list to that count before launch.
    pub fn prepare(&mut self, cores: &[u32], latency: bool, tx_num_core: Option<u32>) -> Result<(), GeneratorError> {
        let mut assignment = if latency {
            CoreAssignment::split_latency(cores)
        } else {
            CoreAssignment::split_unidirectional(cores)
        }
        .map_err(|source| GeneratorError::CoreSplit {
            pod: self.pod.clone(),
            source,
        })?;
        if let Some(n) = tx_num_core {
            assignment.truncate_tx(n as usize).map_err(|source| GeneratorError::CoreSplit {
                pod: self.pod.clone(),
                source,
            })?;
        }
        self.assignment = Some(assignment);
        self.state = State::Prepared;
        Ok(())
    }

    /// Launches the generator inside a `tmux` window named after this
    /// workload, in a session named after the profile, wrapped in a shell
    /// `timeout` of `duration + 2*samples + 24s`.
    pub fn launch(&mut self, cluster: &dyn ClusterClient, params: &GeneratorParams) -> Result<(), GeneratorError> {
        let assignment = self.assignment.as_ref().expect("prepare before launch");
        let total_timeout = params.duration_secs + 2 * params.sample_interval_secs + 24;

        let mut all_cores = vec![assignment.main()];
        all_cores.extend(assignment.tx_cores());
        all_cores.extend(assignment.rx_cores());
        let lcores = all_cores.iter().map(u32::to_string).collect::<Vec<_>>().join(",");

        let tx_range = core_range(assignment.tx_cores());
        let rx_range = core_range(assignment.rx_cores());

        let pktgen_cmd = format!(
            "cd /usr/local/bin; timeout {total_timeout} pktgen --no-telemetry --log-level=7 -l {lcores} -n 4 --socket-mem {mem} --main-lcore {main} --proc-type auto --file-prefix pg -a $PCIDEVICE_INTEL_COM_DPDK -- -G --txd={txd} --rxd={rxd} -f {profile} -m [{tx_range}:{rx_range}].0",
            mem = params.tx_socket_mem,
            main = assignment.main(),
            txd = params.txd,
            rxd = params.rxd,
            profile = params.profile_path,
        );

        tmux::new_session(cluster, &self.pod, &self.session, &self.pod, &pktgen_cmd)?;
        self.state = State::Launched;
        Ok(())
    }

    /// Runs the sampling loop for up to `params.sample_count` ticks,
    /// breaking early on `EGeneratorGone`, then — regardless of early exit
    /// — takes one post-stop sample, pushes the stop command, and takes one
    /// final sample (§4.4, I4).
    pub async fn run_sampling(
        &mut self,
        cluster: Arc<dyn ClusterClient>,
        cancel: CancelToken,
        params: &GeneratorParams,
    ) -> SamplingSummary {
        self.state = State::Sampling;
        let interval = Duration::from_secs(params.sample_interval_secs);
        let mut samples_taken = 0u32;
        let mut generator_exited_early = false;

        for _ in 0..params.sample_count {
            if cancel.is_cancelled() {
                self.state = State::Aborted;
                return SamplingSummary {
                    samples_taken,
                    generator_exited_early: true,
                };
            }
            match push_sample(cluster.as_ref(), &self.pod, params.control_port) {
                TickOutcome::Sampled => samples_taken += 1,
                TickOutcome::GeneratorGone => {
                    generator_exited_early = true;
                    break;
                }
            }
            tokio::time::sleep(interval).await;
        }

        self.state = State::Stopping;
        if !cancel.is_cancelled() {
            if let TickOutcome::Sampled = push_sample(cluster.as_ref(), &self.pod, params.control_port) {
                samples_taken += 1;
            }
            push_stop(cluster.as_ref(), &self.pod, params.control_port);
            if let TickOutcome::Sampled = push_sample(cluster.as_ref(), &self.pod, params.control_port) {
                samples_taken += 1;
            }
        }

        self.state = if cancel.is_cancelled() { State::Aborted } else { State::Done };
        SamplingSummary {
            samples_taken,
            generator_exited_early,
        }
    }

    /// Tears down the tmux session unconditionally — the belt-and-braces
    /// half of cancellation; the generator process dies with its window.
    pub fn abort(&mut self, cluster: &dyn ClusterClient) {
        tmux::kill_session(cluster, &self.pod, &self.session);
        self.state = State::Aborted;
    }
}

fn core_range(cores: &[u32]) -> String {
    match cores {
        [] => String::new(),
        [only] => only.to_string(),
        many => format!("{}-{}", many[0], many[many.len() - 1]),
    }
}

fn push_sample(cluster: &dyn ClusterClient, pod: &str, port: u16) -> TickOutcome {
    let cmd = format!("echo \"{}\" | socat - TCP4:localhost:{port}", bx_profile::SAMPLE_HELPER_LUA);
    match cluster.exec(pod, &["sh", "-c", &cmd]) {
        Ok(output) if output.status.success() => TickOutcome::Sampled,
        Ok(_) => TickOutcome::GeneratorGone,
        Err(_) => TickOutcome::GeneratorGone,
    }
}

fn push_stop(cluster: &dyn ClusterClient, pod: &str, port: u16) {
    let cmd = format!("echo \"{}\" | socat - TCP4:localhost:{port}", bx_profile::STOP_HELPER_LUA);
    if let Err(e) = cluster.exec(pod, &["sh", "-c", &cmd]) {
        log::debug!("stop command on {pod:?} ignored: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_cluster::fake::FakeClusterClient;

    fn params() -> GeneratorParams {
        GeneratorParams {
            profile_path: "/profile_100_flows_pkt_size_512B_50_rate_s.lua".to_string(),
            duration_secs: 30,
            sample_interval_secs: 5,
            sample_count: 6,
            txd: 1024,
            rxd: 1024,
            tx_socket_mem: 2048,
            control_port: 22022,
            latency: false,
            tx_num_core: None,
        }
    }

    fn sample_cmd(port: u16) -> String {
        format!("echo \"{}\" | socat - TCP4:localhost:{port}", bx_profile::SAMPLE_HELPER_LUA)
    }

    fn stop_cmd(port: u16) -> String {
        format!("echo \"{}\" | socat - TCP4:localhost:{port}", bx_profile::STOP_HELPER_LUA)
    }

    #[test]
    fn prepare_rejects_insufficient_cores() {
        let mut driver = GeneratorDriver::new("tx0", "profile");
        assert!(matches!(
            driver.prepare(&[0], false, None),
            Err(GeneratorError::CoreSplit { .. })
        ));
    }

    #[test]
    fn prepare_rejects_tx_num_core_override_exceeding_available() {
        // 5 cores split unidirectionally leaves only 2 tx cores; asking for
        // 99 must surface as a core-split failure, not a silent clamp.
        let mut driver = GeneratorDriver::new("tx0", "profile");
        assert!(matches!(
            driver.prepare(&[0, 1, 2, 3, 4], false, Some(99)),
            Err(GeneratorError::CoreSplit { .. })
        ));
        assert_eq!(driver.state(), State::Fresh);
    }

    #[test]
    fn prepare_then_launch_builds_tmux_command() {
        let client = FakeClusterClient::new(vec![]);
        let mut driver = GeneratorDriver::new("tx0", "myprofile");
        driver.prepare(&[0, 1, 2, 3, 4], false, None).unwrap();

        client.stub_exec(
            "tx0",
            &[
                "tmux",
                "new-session",
                "-d",
                "-s",
                "myprofile",
                "-n",
                "tx0",
                "cd /usr/local/bin; timeout 84 pktgen --no-telemetry --log-level=7 -l 0,1,2,3,4 -n 4 --socket-mem 2048 --main-lcore 0 --proc-type auto --file-prefix pg -a $PCIDEVICE_INTEL_COM_DPDK -- -G --txd=1024 --rxd=1024 -f /profile_100_flows_pkt_size_512B_50_rate_s.lua -m [1-2:3-4].0",
            ],
            0,
            b"",
            b"",
        );
        driver.launch(&client, &params()).unwrap();
        assert_eq!(driver.state(), State::Launched);
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_loop_runs_sample_count_plus_two() {
        let client = FakeClusterClient::new(vec![]);
        for _ in 0..6 {
            client.stub_exec("tx0", &["sh", "-c", &sample_cmd(22022)], 0, b"", b"");
        }
        client.stub_exec("tx0", &["sh", "-c", &stop_cmd(22022)], 0, b"", b"");
        let client: Arc<dyn ClusterClient> = Arc::new(client);

        let mut driver = GeneratorDriver::new("tx0", "myprofile");
        driver.prepare(&[0, 1, 2, 3, 4], false, None).unwrap();
        let summary = driver.run_sampling(client, CancelToken::new(), &params()).await;
        assert_eq!(summary.samples_taken, 6 + 2);
        assert!(!summary.generator_exited_early);
        assert_eq!(driver.state(), State::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn generator_gone_breaks_loop_immediately() {
        let client = FakeClusterClient::new(vec![]);
        // every sample attempt is refused; the loop must break on the first
        // tick rather than retrying, and the two sentinel attempts around
        // stop also fail, so no sample is ever counted.
        client.stub_exec("tx0", &["sh", "-c", &sample_cmd(22022)], 1, b"", b"connection refused");
        client.stub_exec("tx0", &["sh", "-c", &stop_cmd(22022)], 0, b"", b"");
        let client: Arc<dyn ClusterClient> = Arc::new(client);

        let mut driver = GeneratorDriver::new("tx0", "myprofile");
        driver.prepare(&[0, 1, 2, 3, 4], false, None).unwrap();
        let summary = driver.run_sampling(client, CancelToken::new(), &params()).await;
        assert_eq!(summary.samples_taken, 0);
        assert!(summary.generator_exited_early);
        assert_eq!(driver.state(), State::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_sampling_without_sentinels() {
        let client: Arc<dyn ClusterClient> = Arc::new(FakeClusterClient::new(vec![]));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut driver = GeneratorDriver::new("tx0", "myprofile");
        driver.prepare(&[0, 1, 2, 3, 4], false, None).unwrap();
        let summary = driver.run_sampling(client, cancel, &params()).await;
        assert_eq!(summary.samples_taken, 0);
        assert!(summary.generator_exited_early);
        assert_eq!(driver.state(), State::Aborted);
    }
}
