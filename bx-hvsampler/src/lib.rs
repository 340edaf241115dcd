//! C5 Hypervisor Sampler: for each unique hypervisor in the current run,
//! periodically reads per-virtual-function counters over the Connection
//! Pool's remote-shell sessions and streams them to a per-hypervisor CSV.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bx_connpool::{ConnectionPool, Connector};
use bx_types::CancelToken;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HvSamplerError {
    #[error("creating csv {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

static VF_LIST_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s+true").unwrap());
static VF_STAT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?):\s+(\S+)\s*$").unwrap());

/// Enumerates active VF ids from `esxcli network sriovnic vf list` output —
/// one remote command, matching `get_active_vfs2` in the original sampler.
pub fn parse_active_vfs(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| VF_LIST_LINE.captures(line))
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

/// Parses `esxcli network sriovnic vf stats` output into `(field, value)`
/// pairs, preserving the order fields appear in so the CSV header can be
/// inferred from the first sample.
pub fn parse_vf_stats(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| VF_STAT_LINE.captures(line))
        .map(|c| (c[1].trim().to_string(), c[2].to_string()))
        .collect()
}

/// Streams one hypervisor's samples to a CSV file whose header is inferred
/// from the first sample's field names plus `timestamp,vf_id,nic_name,esxi_host`.
struct HypervisorCsvWriter {
    path: PathBuf,
    writer: Option<csv::Writer<std::fs::File>>,
    field_order: Vec<String>,
}

impl HypervisorCsvWriter {
    fn new(path: PathBuf) -> Self {
        HypervisorCsvWriter {
            path,
            writer: None,
            field_order: Vec::new(),
        }
    }

    fn write_sample(
        &mut self,
        timestamp: &str,
        vf_id: u32,
        nic_name: &str,
        esxi_host: &str,
        fields: &[(String, String)],
    ) -> Result<(), HvSamplerError> {
        if self.writer.is_none() {
            let file = std::fs::File::create(&self.path).map_err(|source| HvSamplerError::Io {
                path: self.path.clone(),
                source,
            })?;
            let mut writer = csv::Writer::from_writer(file);
            self.field_order = fields.iter().map(|(k, _)| k.clone()).collect();
            let mut header = self.field_order.clone();
            header.extend(["timestamp".to_string(), "vf_id".to_string(), "nic_name".to_string(), "esxi_host".to_string()]);
            writer.write_record(&header).map_err(|source| HvSamplerError::Csv {
                path: self.path.clone(),
                source,
            })?;
            self.writer = Some(writer);
        }

        let by_name: HashMap<&str, &str> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut row: Vec<String> = self
            .field_order
            .iter()
            .map(|name| by_name.get(name.as_str()).copied().unwrap_or("").to_string())
            .collect();
        row.extend([timestamp.to_string(), vf_id.to_string(), nic_name.to_string(), esxi_host.to_string()]);

        let writer = self.writer.as_mut().expect("just initialized");
        writer.write_record(&row).map_err(|source| HvSamplerError::Csv {
            path: self.path.clone(),
            source,
        })?;
        writer.flush().map_err(|source| HvSamplerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Runs one hypervisor's sampling task for `duration + grace`, never less
/// than one full `interval`. Remote-shell failures are logged and skipped —
/// a sampler never raises out of this task (`ESamplerRemote`).
pub async fn sample_hypervisor<C: Connector + 'static>(
    pool: Arc<ConnectionPool<C>>,
    host: String,
    nic_name: String,
    output_path: PathBuf,
    interval: Duration,
    run_for: Duration,
    cancel: CancelToken,
) -> Result<(), HvSamplerError> {
    let run_for = run_for.max(interval);

    let vfs = match pool.with_session(&host, |s| s.exec(&format!("esxcli network sriovnic vf list -n {nic_name}"))) {
        Ok(Ok(output)) if output.success() => parse_active_vfs(&output.stdout),
        _ => {
            log::warn!("could not enumerate VFs on {host} (nic {nic_name}), skipping sampler");
            return Ok(());
        }
    };
    if vfs.is_empty() {
        log::warn!("no active VFs on {host} (nic {nic_name})");
        return Ok(());
    }

    let mut writer = HypervisorCsvWriter::new(output_path);
    let deadline = tokio::time::Instant::now() + run_for;

    while tokio::time::Instant::now() < deadline {
        if cancel.is_cancelled() {
            break;
        }
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        for &vf in &vfs {
            let result = pool.with_session(&host, |s| {
                s.exec(&format!("esxcli network sriovnic vf stats -n {nic_name} -v {vf}"))
            });
            match result {
                Ok(Ok(output)) if output.success() => {
                    let fields = parse_vf_stats(&output.stdout);
                    if let Err(e) = writer.write_sample(&timestamp, vf, &nic_name, &host, &fields) {
                        log::warn!("writing sample for {host}/vf{vf} failed: {e}");
                    }
                }
                Ok(Ok(_)) => log::warn!("esxcli vf stats on {host}/vf{vf} returned non-zero"),
                Ok(Err(e)) => log::warn!("remote-shell error sampling {host}/vf{vf}: {e}"),
                Err(e) => log::warn!("pool error sampling {host}/vf{vf}: {e}"),
            }
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

/// Computes the set of unique hypervisors present in the current run from
/// `host-node -> hypervisor-id`; nodes with no mapping are skipped here by
/// virtue of not being present in the map (the Topology Resolver already
/// warned about them).
pub fn unique_hypervisors(hypervisor_map: &HashMap<String, String>) -> Vec<String> {
    let mut seen: Vec<String> = hypervisor_map.values().cloned().collect();
    seen.sort();
    seen.dedup();
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_rexec::fake::FakeShell;
    use bx_rexec::{RemoteOutput, RemoteShell, RexecError};

    #[test]
    fn parses_active_vf_ids() {
        let output = " 0    true   true\n 1    false  true\n 2    true   true\n";
        assert_eq!(parse_active_vfs(output), vec![0, 2]);
    }

    #[test]
    fn parses_vf_stat_fields_in_order() {
        let output = "Rx Unicast Pkt:   12345\nTx Unicast Pkt:   6789\nRx Broadcast Pkt:  3\n";
        let fields = parse_vf_stats(output);
        assert_eq!(
            fields,
            vec![
                ("Rx Unicast Pkt".to_string(), "12345".to_string()),
                ("Tx Unicast Pkt".to_string(), "6789".to_string()),
                ("Rx Broadcast Pkt".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn unique_hypervisors_dedups_and_sorts() {
        let mut map = HashMap::new();
        map.insert("node-a".to_string(), "esx01".to_string());
        map.insert("node-b".to_string(), "esx02".to_string());
        map.insert("node-c".to_string(), "esx01".to_string());
        assert_eq!(unique_hypervisors(&map), vec!["esx01".to_string(), "esx02".to_string()]);
    }

    struct ScriptedConnector {
        list_response: RemoteOutput,
        stats_response: RemoteOutput,
    }

    impl Connector for ScriptedConnector {
        fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RexecError> {
            Ok(Box::new(FakeShell::new(
                host,
                vec![self.list_response.clone(), self.stats_response.clone()],
            )))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writes_header_and_one_row_per_vf_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("esx01.csv");

        let connector = ScriptedConnector {
            list_response: RemoteOutput {
                exit_status: 0,
                stdout: " 0    true   true\n".to_string(),
                stderr: String::new(),
            },
            stats_response: RemoteOutput {
                exit_status: 0,
                stdout: "Rx Unicast Pkt:   100\nTx Unicast Pkt:   50\n".to_string(),
                stderr: String::new(),
            },
        };
        let pool = Arc::new(ConnectionPool::new(connector));

        sample_hypervisor(
            pool,
            "esx01".to_string(),
            "vmnic0".to_string(),
            out_path.clone(),
            Duration::from_secs(1),
            Duration::from_millis(500),
            CancelToken::new(),
        )
        .await
        .unwrap();

        let contents = std::fs::read_to_string(&out_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "Rx Unicast Pkt,Tx Unicast Pkt,timestamp,vf_id,nic_name,esxi_host");
        let row = lines.next().unwrap();
        assert!(row.starts_with("100,50,"));
        assert!(row.ends_with("0,vmnic0,esx01"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_vfs_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = ScriptedConnector {
            list_response: RemoteOutput {
                exit_status: 0,
                stdout: "".to_string(),
                stderr: String::new(),
            },
            stats_response: RemoteOutput {
                exit_status: 0,
                stdout: "".to_string(),
                stderr: String::new(),
            },
        };
        let pool = Arc::new(ConnectionPool::new(connector));
        let out = dir.path().join("esx02.csv");
        sample_hypervisor(
            pool,
            "esx02".to_string(),
            "vmnic0".to_string(),
            out.clone(),
            Duration::from_secs(1),
            Duration::from_millis(500),
            CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(!out.exists());
    }
}
