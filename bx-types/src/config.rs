use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sample-interval ({sample_interval}) must be < duration ({duration})")]
    SampleIntervalNotLessThanDuration { sample_interval: u64, duration: u64 },
    #[error("txd {0} is not a power of two")]
    TxdNotPowerOfTwo(u32),
    #[error("rxd {0} is not a power of two")]
    RxdNotPowerOfTwo(u32),
    #[error("control-port {0} out of range 1024..65535")]
    ControlPortOutOfRange(u16),
    #[error("rx_num_core must be >= 1 if given, got {0}")]
    BadRxNumCore(u32),
    #[error("tx_num_core must be >= 1 if given, got {0}")]
    BadTxNumCore(u32),
}

/// Validated invocation options for `start_generator` (§6). Built once at
/// startup and passed by reference to every component; never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub profile: String,
    pub duration_secs: u64,
    pub sample_interval_secs: u64,
    pub sample_count: Option<u32>,
    pub txd: u32,
    pub rxd: u32,
    pub tx_socket_mem: u32,
    pub rx_socket_mem: u32,
    pub warmup_duration_secs: u64,
    pub control_port: u16,
    pub rx_num_core: Option<u32>,
    pub tx_num_core: Option<u32>,
    pub nic_name: String,
    pub default_username: String,
    pub default_password: String,
    pub skip_copy: bool,
    pub skip_testpmd: bool,
    pub latency: bool,
    pub results_dir: PathBuf,
}

impl Config {
    /// Validates P4 (`sample_interval < duration`), P5 (`txd`/`rxd` powers
    /// of two), and the remaining range constraints from §6, returning the
    /// first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_secs >= self.duration_secs {
            return Err(ConfigError::SampleIntervalNotLessThanDuration {
                sample_interval: self.sample_interval_secs,
                duration: self.duration_secs,
            });
        }
        if !self.txd.is_power_of_two() {
            return Err(ConfigError::TxdNotPowerOfTwo(self.txd));
        }
        if !self.rxd.is_power_of_two() {
            return Err(ConfigError::RxdNotPowerOfTwo(self.rxd));
        }
        if !(1024..65535).contains(&self.control_port) {
            return Err(ConfigError::ControlPortOutOfRange(self.control_port));
        }
        if let Some(n) = self.rx_num_core {
            if n < 1 {
                return Err(ConfigError::BadRxNumCore(n));
            }
        }
        if let Some(n) = self.tx_num_core {
            if n < 1 {
                return Err(ConfigError::BadTxNumCore(n));
            }
        }
        Ok(())
    }

    /// Computed iteration count for the sampling loop: `sample_count` if
    /// set, else `floor(duration / sample_interval)`.
    pub fn effective_sample_count(&self) -> u32 {
        self.sample_count
            .unwrap_or((self.duration_secs / self.sample_interval_secs) as u32)
    }

    /// Every configuration option seen at invocation, for `metadata.txt`
    /// (§6). `default_password` is deliberately omitted — nothing in the
    /// result artifacts should carry a credential.
    pub fn metadata_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("profile".to_string(), self.profile.clone());
        fields.insert("duration".to_string(), self.duration_secs.to_string());
        fields.insert("sample-interval".to_string(), self.sample_interval_secs.to_string());
        fields.insert("sample-count".to_string(), self.effective_sample_count().to_string());
        fields.insert("txd".to_string(), self.txd.to_string());
        fields.insert("rxd".to_string(), self.rxd.to_string());
        fields.insert("tx-socket-mem".to_string(), self.tx_socket_mem.to_string());
        fields.insert("rx-socket-mem".to_string(), self.rx_socket_mem.to_string());
        fields.insert("warmup-duration".to_string(), self.warmup_duration_secs.to_string());
        fields.insert("control-port".to_string(), self.control_port.to_string());
        if let Some(n) = self.rx_num_core {
            fields.insert("rx_num_core".to_string(), n.to_string());
        }
        if let Some(n) = self.tx_num_core {
            fields.insert("tx_num_core".to_string(), n.to_string());
        }
        fields.insert("nic-name".to_string(), self.nic_name.clone());
        fields.insert("default-username".to_string(), self.default_username.clone());
        fields.insert("skip-copy".to_string(), self.skip_copy.to_string());
        fields.insert("skip-testpmd".to_string(), self.skip_testpmd.to_string());
        fields.insert("latency".to_string(), self.latency.to_string());
        fields
    }
}
