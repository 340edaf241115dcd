use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    #[error("workload {name:?} exposes {got} cores, need at least 2")]
    TooFewCores { name: String, got: usize },
    #[error("workload {name:?} has duplicate core ids in its allowed-core list")]
    DuplicateCores { name: String },
}

/// A single participant pod: name, placement, and the cores the cluster
/// reports as allowed for it. `hypervisor` is empty for bare-metal nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    name: String,
    host_node: String,
    hypervisor: Option<String>,
    port_mac: Option<String>,
    cores: Vec<u32>,
}

impl Workload {
    /// Builds a workload, de-duplicating `cores` while preserving first-seen
    /// order, and rejecting fewer than 2 distinct cores (I2).
    pub fn new(
        name: impl Into<String>,
        host_node: impl Into<String>,
        hypervisor: Option<String>,
        port_mac: Option<String>,
        cores: Vec<u32>,
    ) -> Result<Self, WorkloadError> {
        let name = name.into();
        let mut seen = std::collections::HashSet::new();
        let mut deduped = Vec::with_capacity(cores.len());
        for c in cores {
            if seen.insert(c) {
                deduped.push(c);
            }
        }
        if deduped.len() < 2 {
            return Err(WorkloadError::TooFewCores {
                name,
                got: deduped.len(),
            });
        }
        Ok(Workload {
            name,
            host_node: host_node.into(),
            hypervisor,
            port_mac,
            cores: deduped,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_node(&self) -> &str {
        &self.host_node
    }

    pub fn hypervisor(&self) -> Option<&str> {
        self.hypervisor.as_deref()
    }

    pub fn port_mac(&self) -> Option<&str> {
        self.port_mac.as_deref()
    }

    pub fn cores(&self) -> &[u32] {
        &self.cores
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn is_tx(&self) -> bool {
        self.name.starts_with("tx")
    }

    pub fn is_rx(&self) -> bool {
        self.name.starts_with("rx")
    }
}
