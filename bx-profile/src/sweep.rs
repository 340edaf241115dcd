//! `generate_flow`: emits one profile script per `(flows, rate, pkt-size,
//! mode)` combination in a sweep, for every (tx, rx) pair.

use std::path::{Path, PathBuf};

use bx_types::FlowMode;
use thiserror::Error;

use crate::template::{ProfileParams, Templater};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("rate {0} out of range 1..=100")]
    BadRate(u8),
    #[error("packet size {0} out of range 64..=9000")]
    BadPktSize(u32),
    #[error("writing profile {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-pair addressing the sweep needs to render flows against.
pub struct PairAddressing {
    pub pair_dir: String,
    pub src_mac: String,
    pub dst_mac: String,
    pub base_src_ip: String,
    pub base_dst_ip: String,
    pub base_src_port: u16,
    pub base_dst_port: u16,
}

#[derive(Debug, Clone)]
pub struct SweepSpec {
    pub flow_counts: Vec<u32>,
    pub rates: Vec<u8>,
    pub pkt_sizes: Vec<u32>,
    pub modes: Vec<FlowMode>,
}

impl SweepSpec {
    fn validate(&self) -> Result<(), SweepError> {
        for &r in &self.rates {
            if !(1..=100).contains(&r) {
                return Err(SweepError::BadRate(r));
            }
        }
        for &s in &self.pkt_sizes {
            if !(64..=9000).contains(&s) {
                return Err(SweepError::BadPktSize(s));
            }
        }
        Ok(())
    }
}

/// Writes one profile file per combination, for every pair, under
/// `<flows_dir>/<pair_dir>/`. Returns the paths written.
pub fn generate_flow(
    templater: &dyn Templater,
    pairs: &[PairAddressing],
    spec: &SweepSpec,
    flows_dir: &Path,
) -> Result<Vec<PathBuf>, SweepError> {
    spec.validate()?;

    let mut written = Vec::new();
    for pair in pairs {
        let pair_dir = flows_dir.join(&pair.pair_dir);
        std::fs::create_dir_all(&pair_dir).map_err(|source| SweepError::Write {
            path: pair_dir.clone(),
            source,
        })?;

        for &num_flows in &spec.flow_counts {
            for &rate in &spec.rates {
                for &pkt_size in &spec.pkt_sizes {
                    for &mode in &spec.modes {
                        let params = ProfileParams {
                            src_mac: pair.src_mac.clone(),
                            dst_mac: pair.dst_mac.clone(),
                            base_src_ip: pair.base_src_ip.clone(),
                            base_dst_ip: pair.base_dst_ip.clone(),
                            base_src_port: pair.base_src_port,
                            base_dst_port: pair.base_dst_port,
                            percent_rate: rate,
                            pkt_size,
                            num_flows,
                            flow_mode: mode,
                        };
                        let filename = bx_types::Profile::filename_for(num_flows, pkt_size, rate, mode);
                        let path = pair_dir.join(&filename);
                        let rendered = templater.render(&params);
                        std::fs::write(&path, rendered).map_err(|source| SweepError::Write {
                            path: path.clone(),
                            source,
                        })?;
                        written.push(path);
                    }
                }
            }
        }
    }
    Ok(written)
}
