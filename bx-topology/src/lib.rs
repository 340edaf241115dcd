//! C1 Topology Resolver: enumerates TX/RX pairs and maps each pair's host
//! nodes to hypervisors.

use std::collections::HashMap;
use std::sync::Arc;

use bx_cluster::ClusterClient;
use bx_types::pair::Pair;
use bx_types::workload::{Workload, WorkloadError};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Node label carrying the hypervisor identifier; absent on bare-metal nodes.
pub const HYPERVISOR_LABEL_KEY: &str = "hypervisor-id";

/// Process name a probe conflict is detected against — a generator already
/// running in the workload would make a no-op probe lie about the port MAC.
const GENERATOR_PROCESS_NAME: &str = "pktgen";

const MAX_CONCURRENT_PROBES: usize = 8;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("tx/rx workload count mismatch: {tx} tx vs {rx} rx")]
    TopologyMismatch { tx: usize, rx: usize },
    #[error("no tx/rx workloads found in the namespace")]
    NoWorkloads,
    #[error("generator process already running in workload {0:?}, refusing to probe")]
    ProbeConflict(String),
    #[error("cluster error probing workload {workload:?}: {source}")]
    Cluster {
        workload: String,
        #[source]
        source: bx_cluster::ClusterError,
    },
    #[error("workload {0:?} failed validation: {1}")]
    Workload(String, WorkloadError),
    #[error("pair construction failed: {0}")]
    Pair(#[from] bx_types::pair::PairError),
}

/// `host-node -> hypervisor-id`, omitting unlabeled nodes.
pub type HypervisorMap = HashMap<String, String>;

struct ProbeResult {
    name: String,
    host_node: String,
    port_mac: Option<String>,
    cores: Vec<u32>,
}

/// Lists participating workloads, probes each concurrently (bounded to
/// `MAX_CONCURRENT_PROBES`), and pairs tx/rx by lexicographic ordinal.
pub async fn resolve(cluster: Arc<dyn ClusterClient>) -> Result<(Vec<Pair>, HypervisorMap), TopologyError> {
    let pods = cluster.list_pods().map_err(|source| TopologyError::Cluster {
        workload: "<list>".to_string(),
        source,
    })?;

    let mut names: Vec<String> = pods
        .iter()
        .map(|p| p.name.clone())
        .filter(|n| n.starts_with("tx") || n.starts_with("rx"))
        .collect();
    names.sort();

    let tx_count = names.iter().filter(|n| n.starts_with("tx")).count();
    let rx_count = names.iter().filter(|n| n.starts_with("rx")).count();
    if tx_count == 0 && rx_count == 0 {
        return Err(TopologyError::NoWorkloads);
    }
    if tx_count != rx_count {
        return Err(TopologyError::TopologyMismatch {
            tx: tx_count,
            rx: rx_count,
        });
    }

    let node_by_name: HashMap<String, String> =
        pods.into_iter().map(|p| (p.name, p.node_name)).collect();

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
    let mut join_set = tokio::task::JoinSet::new();
    for name in names {
        let cluster = cluster.clone();
        let semaphore = semaphore.clone();
        let host_node = node_by_name.get(&name).cloned().unwrap_or_default();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            probe_workload(cluster.as_ref(), name, host_node)
        });
    }

    let mut probes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        probes.push(joined.expect("probe task panicked")?);
    }
    probes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut workloads = Vec::new();
    let mut hypervisor_map = HypervisorMap::new();
    for p in probes {
        if let Some(id) = cluster
            .node_label(&p.host_node, HYPERVISOR_LABEL_KEY)
            .map_err(|source| TopologyError::Cluster {
                workload: p.name.clone(),
                source,
            })?
        {
            hypervisor_map.insert(p.host_node.clone(), id);
        }
        let hypervisor = hypervisor_map.get(&p.host_node).cloned();
        let workload = Workload::new(p.name.clone(), p.host_node, hypervisor, p.port_mac, p.cores)
            .map_err(|e| TopologyError::Workload(p.name, e))?;
        workloads.push(workload);
    }

    let pairs = bx_types::pair::pair_by_index(workloads)?;

    Ok((pairs, hypervisor_map))
}

fn probe_workload(cluster: &dyn ClusterClient, name: String, host_node: String) -> Result<ProbeResult, TopologyError> {
    let conflict = cluster
        .exec(&name, &["pgrep", "-f", GENERATOR_PROCESS_NAME])
        .map_err(|source| TopologyError::Cluster {
            workload: name.clone(),
            source,
        })?;
    if conflict.status.success() {
        return Err(TopologyError::ProbeConflict(name));
    }

    let mac_out = cluster
        .exec(&name, &["sh", "-c", "dpdk-testpmd -a $PCIDEVICE_INTEL_COM_DPDK --"])
        .map_err(|source| TopologyError::Cluster {
            workload: name.clone(),
            source,
        })?;
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&mac_out.stdout),
        String::from_utf8_lossy(&mac_out.stderr)
    );
    let port_mac = extract_mac(&combined);

    let numa_out = cluster
        .exec(&name, &["numactl", "-s"])
        .map_err(|source| TopologyError::Cluster {
            workload: name.clone(),
            source,
        })?;
    let cores = parse_physcpubind(&String::from_utf8_lossy(&numa_out.stdout));

    Ok(ProbeResult {
        name,
        host_node,
        port_mac,
        cores,
    })
}

fn extract_mac(text: &str) -> Option<String> {
    for token in text.split_whitespace() {
        if is_mac_like(token) {
            return Some(token.to_string());
        }
    }
    None
}

fn is_mac_like(token: &str) -> bool {
    let parts: Vec<&str> = token.split(':').collect();
    parts.len() == 6 && parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse_physcpubind(output: &str) -> Vec<u32> {
    for line in output.lines() {
        if let Some(rest) = line.split("physcpubind:").nth(1) {
            return rest
                .split_whitespace()
                .filter_map(|t| t.parse::<u32>().ok())
                .collect();
        }
    }
    Vec::new()
}
