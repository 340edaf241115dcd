//! C3 Receiver Driver: per-RX-workload state machine that warms up the
//! forwarding plane, launches the receive-side forwarder, and confirms
//! liveness before the Controller starts the matching generator.

use std::time::Duration;

use bx_cluster::ClusterClient;
use thiserror::Error;

const FORWARDER_PROCESS_NAME: &str = "dpdk-testpmd";
const STAT_LOG_PATH: &str = "/output/stats.log";
/// Known in-pod path the warm-up forwarder's output is redirected to, so the
/// Controller can pull it back as `<tx>_warmup.log` (§4.8; "may be absent").
pub const WARMUP_LOG_PATH: &str = "/output/warmup.log";
/// Warm-up exit code the OS-level `timeout` wrapper reports when the
/// forwarder was still running at the deadline — the expected outcome.
const WARMUP_TIMEOUT_EXIT_CODE: i32 = 124;
/// How long after launch the health check polls before giving up.
const HEALTH_CHECK_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Fresh,
    Warming,
    WarmDone,
    Running,
    Draining,
    Stopped,
    Failed,
}

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("workload {name:?} needs at least 2 cores, has {got}")]
    InsufficientCores { name: String, got: usize },
    #[error("warm-up on {pod:?} exited {code} (neither success nor timeout)")]
    WarmupFailed { pod: String, code: i32 },
    #[error("cluster error on {pod:?}: {source}")]
    Cluster {
        pod: String,
        #[source]
        source: bx_cluster::ClusterError,
    },
    #[error("receiver on {pod:?} not live after launch: {reason}")]
    NotLive { pod: String, reason: String },
}

/// `(main, cores)` for one receiver workload — simpler than the generator's
/// tx/rx split since the receiver only ever forwards one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverCores {
    main: u32,
    cores: Vec<u32>,
}

impl ReceiverCores {
    /// `main` is always `cores[0]`; the rest is either every remaining core,
    /// or an explicit prefix of it if the caller requested a specific count.
    pub fn assign(name: &str, available: &[u32], explicit_n: Option<u32>) -> Result<Self, ReceiverError> {
        if available.len() < 2 {
            return Err(ReceiverError::InsufficientCores {
                name: name.to_string(),
                got: available.len(),
            });
        }
        let main = available[0];
        let rest = &available[1..];
        let cores = match explicit_n {
            Some(n) => {
                let n = n as usize;
                if rest.len() < n {
                    return Err(ReceiverError::InsufficientCores {
                        name: name.to_string(),
                        got: available.len(),
                    });
                }
                rest[..n].to_vec()
            }
            None => rest.to_vec(),
        };
        Ok(ReceiverCores { main, cores })
    }

    pub fn main(&self) -> u32 {
        self.main
    }

    pub fn cores(&self) -> &[u32] {
        &self.cores
    }

    fn core_list_argv(&self) -> String {
        let mut all = vec![self.main];
        all.extend(&self.cores);
        all.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
    }
}

/// One RX workload's driver. Owns its state; every operation consumes and
/// re-produces the driver so illegal transitions don't compile silently
/// past a stale reference.
pub struct ReceiverDriver {
    pod: String,
    state: State,
    cores: Option<ReceiverCores>,
}

impl ReceiverDriver {
    pub fn new(pod: impl Into<String>) -> Self {
        ReceiverDriver {
            pod: pod.into(),
            state: State::Fresh,
            cores: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn cores(&self) -> Option<&ReceiverCores> {
        self.cores.as_ref()
    }

    pub fn assign_cores(&mut self, available: &[u32], explicit_n: Option<u32>) -> Result<(), ReceiverError> {
        let cores = ReceiverCores::assign(&self.pod, available, explicit_n)?;
        self.cores = Some(cores);
        Ok(())
    }

    /// Runs the forwarder in transmit-only mode against the TX peer's MAC
    /// for `duration`, to populate the forwarding plane before measurement.
    /// A 124 (timeout) exit is the expected, successful outcome; any other
    /// non-zero exit is `EWarmupFailed` but does not abort the Pair —
    /// the caller records it and proceeds to `start`.
    pub fn warmup(
        &mut self,
        cluster: &dyn ClusterClient,
        peer_mac: &str,
        duration: Duration,
    ) -> Result<(), ReceiverError> {
        self.state = State::Warming;
        let cores = self.cores.as_ref().expect("assign_cores before warmup");
        let secs = duration.as_secs();
        let cmd = format!(
            "timeout {secs} dpdk-testpmd -l {cores} -n 4 --proc-type auto --file-prefix testpmd_warmup -a $PCIDEVICE_INTEL_COM_DPDK -- --forward-mode=txonly --eth-peer=0,{mac} --auto-start > {log} 2>&1",
            cores = cores.core_list_argv(),
            mac = peer_mac,
            log = WARMUP_LOG_PATH,
        );
        let output = cluster
            .exec(&self.pod, &["sh", "-c", &cmd])
            .map_err(|source| ReceiverError::Cluster {
                pod: self.pod.clone(),
                source,
            })?;

        self.state = State::WarmDone;
        let code = output.status.code().unwrap_or(-1);
        if code != 0 && code != WARMUP_TIMEOUT_EXIT_CODE {
            return Err(ReceiverError::WarmupFailed {
                pod: self.pod.clone(),
                code,
            });
        }
        Ok(())
    }

    /// Launches the forwarder in receive-only mode under a shell-level
    /// `timeout`, then waits briefly and checks that the process is alive
    /// and its stat log is non-empty. Async so the health-check wait yields
    /// the reactor instead of blocking a runtime worker thread for 2s.
    pub async fn start(&mut self, cluster: &dyn ClusterClient, total_timeout: Duration) -> Result<(), ReceiverError> {
        let cores = self.cores.as_ref().expect("assign_cores before start").clone();
        let secs = total_timeout.as_secs();
        let launch_cmd = format!(
            "timeout {secs} dpdk-testpmd -l {cores} -n 4 --socket-mem 2048 --proc-type auto --file-prefix testpmd_rx -a $PCIDEVICE_INTEL_COM_DPDK -- --forward-mode=rxonly --auto-start --stats-period 1 > {log} 2>&1 &",
            cores = cores.core_list_argv(),
            log = STAT_LOG_PATH,
        );
        cluster
            .exec(&self.pod, &["sh", "-c", &launch_cmd])
            .map_err(|source| ReceiverError::Cluster {
                pod: self.pod.clone(),
                source,
            })?;

        tokio::time::sleep(HEALTH_CHECK_WAIT).await;

        let alive = cluster
            .exec(&self.pod, &["pgrep", "-f", FORWARDER_PROCESS_NAME])
            .map_err(|source| ReceiverError::Cluster {
                pod: self.pod.clone(),
                source,
            })?
            .status
            .success();
        if !alive {
            self.state = State::Failed;
            return Err(ReceiverError::NotLive {
                pod: self.pod.clone(),
                reason: "forwarder process not found".to_string(),
            });
        }

        let log_check = cluster
            .exec(
                &self.pod,
                &["sh", "-c", &format!("test -s {STAT_LOG_PATH} && echo OK || echo FAIL")],
            )
            .map_err(|source| ReceiverError::Cluster {
                pod: self.pod.clone(),
                source,
            })?;
        let log_ok = String::from_utf8_lossy(&log_check.stdout).trim() == "OK";
        if !log_ok {
            self.state = State::Failed;
            return Err(ReceiverError::NotLive {
                pod: self.pod.clone(),
                reason: "stat log missing or empty".to_string(),
            });
        }

        self.state = State::Running;
        Ok(())
    }

    /// Sends the soft-interrupt signal by name-scan process-kill.
    pub fn stop(&mut self, cluster: &dyn ClusterClient) -> Result<(), ReceiverError> {
        self.state = State::Draining;
        cluster
            .exec(&self.pod, &["pkill", "-SIGINT", "-f", FORWARDER_PROCESS_NAME])
            .map_err(|source| ReceiverError::Cluster {
                pod: self.pod.clone(),
                source,
            })?;
        self.state = State::Stopped;
        Ok(())
    }
}

impl Clone for ReceiverCores {
    fn clone(&self) -> Self {
        ReceiverCores {
            main: self.main,
            cores: self.cores.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_cluster::fake::FakeClusterClient;

    #[test]
    fn assigns_all_remaining_cores_by_default() {
        let cores = ReceiverCores::assign("rx0", &[0, 1, 2, 3], None).unwrap();
        assert_eq!(cores.main(), 0);
        assert_eq!(cores.cores(), &[1, 2, 3]);
    }

    #[test]
    fn assigns_explicit_count() {
        let cores = ReceiverCores::assign("rx0", &[0, 1, 2, 3], Some(1)).unwrap();
        assert_eq!(cores.cores(), &[1]);
    }

    #[test]
    fn rejects_insufficient_cores() {
        assert!(matches!(
            ReceiverCores::assign("rx0", &[0], None),
            Err(ReceiverError::InsufficientCores { .. })
        ));
    }

    #[test]
    fn rejects_explicit_count_exceeding_available() {
        assert!(matches!(
            ReceiverCores::assign("rx0", &[0, 1, 2], Some(5)),
            Err(ReceiverError::InsufficientCores { .. })
        ));
    }

    #[test]
    fn warmup_timeout_exit_is_success() {
        let client = FakeClusterClient::new(vec![]);
        let mut driver = ReceiverDriver::new("rx0");
        driver.assign_cores(&[0, 1, 2], None).unwrap();
        client.stub_exec(
            "rx0",
            &[
                "sh",
                "-c",
                "timeout 5 dpdk-testpmd -l 0,1,2 -n 4 --proc-type auto --file-prefix testpmd_warmup -a $PCIDEVICE_INTEL_COM_DPDK -- --forward-mode=txonly --eth-peer=0,aa:bb:cc:dd:ee:ff --auto-start > /output/warmup.log 2>&1",
            ],
            124,
            b"",
            b"",
        );
        let res = driver.warmup(&client, "aa:bb:cc:dd:ee:ff", Duration::from_secs(5));
        assert!(res.is_ok());
        assert_eq!(driver.state(), State::WarmDone);
    }

    #[test]
    fn warmup_other_nonzero_is_recorded_failure() {
        let client = FakeClusterClient::new(vec![]);
        let mut driver = ReceiverDriver::new("rx0");
        driver.assign_cores(&[0, 1, 2], None).unwrap();
        client.stub_exec(
            "rx0",
            &[
                "sh",
                "-c",
                "timeout 5 dpdk-testpmd -l 0,1,2 -n 4 --proc-type auto --file-prefix testpmd_warmup -a $PCIDEVICE_INTEL_COM_DPDK -- --forward-mode=txonly --eth-peer=0,aa:bb:cc:dd:ee:ff --auto-start > /output/warmup.log 2>&1",
            ],
            1,
            b"",
            b"bad arg",
        );
        let err = driver.warmup(&client, "aa:bb:cc:dd:ee:ff", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ReceiverError::WarmupFailed { code: 1, .. }));
        // warm-up failure is non-fatal: the driver still reaches WarmDone.
        assert_eq!(driver.state(), State::WarmDone);
    }

    #[test]
    fn stop_transitions_through_draining_to_stopped() {
        let client = FakeClusterClient::new(vec![]);
        client.stub_exec("rx0", &["pkill", "-SIGINT", "-f", FORWARDER_PROCESS_NAME], 0, b"", b"");
        let mut driver = ReceiverDriver::new("rx0");
        driver.stop(&client).unwrap();
        assert_eq!(driver.state(), State::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn start_transitions_to_running_on_live_process_and_nonempty_log() {
        let client = FakeClusterClient::new(vec![]);
        client.stub_exec("rx0", &["pgrep", "-f", FORWARDER_PROCESS_NAME], 0, b"4242\n", b"");
        client.stub_exec(
            "rx0",
            &["sh", "-c", &format!("test -s {STAT_LOG_PATH} && echo OK || echo FAIL")],
            0,
            b"OK\n",
            b"",
        );
        let mut driver = ReceiverDriver::new("rx0");
        driver.assign_cores(&[0, 1, 2], None).unwrap();
        driver.start(&client, Duration::from_secs(74)).await.unwrap();
        assert_eq!(driver.state(), State::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_when_stat_log_check_comes_back_empty() {
        let client = FakeClusterClient::new(vec![]);
        client.stub_exec("rx0", &["pgrep", "-f", FORWARDER_PROCESS_NAME], 0, b"4242\n", b"");
        // log check left unstubbed: the fake defaults to an empty,
        // successful response, which is not "OK".
        let mut driver = ReceiverDriver::new("rx0");
        driver.assign_cores(&[0, 1, 2], None).unwrap();
        let err = driver.start(&client, Duration::from_secs(74)).await.unwrap_err();
        assert!(matches!(err, ReceiverError::NotLive { .. }));
        assert_eq!(driver.state(), State::Failed);
    }
}
