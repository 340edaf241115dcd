//! C8 Artifact Layout Writer: lays out one Pair's results directory and
//! emits the parsed TX/RX archives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bx_types::pair::Pair;
use bx_types::{ExperimentId, Profile, SampleSeries};
use thiserror::Error;

use crate::archive::{self, ArchiveName, Role};
use crate::metadata;
use crate::parse;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("creating directory {path:?}: {source}")]
    Mkdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Metadata(#[from] metadata::MetadataError),
    #[error(transparent)]
    Archive(#[from] archive::ArchiveError),
}

/// Everything collected for one Pair before it is written to disk.
pub struct PairArtifactInputs<'a> {
    pub experiment_id: &'a ExperimentId,
    pub pair: &'a Pair,
    pub profile: &'a Profile,
    pub metadata: BTreeMap<String, String>,
    pub warmup_log: Option<&'a str>,
    pub rx_stats_log: &'a str,
    pub tx_port_rate_csv: &'a str,
    pub tx_port_csv: &'a str,
    pub tx_cores: u32,
    pub rx_cores: u32,
    /// `YYYYMMDD_HHMMSS`, supplied by the caller so archive naming stays
    /// deterministic under test.
    pub timestamp: &'a str,
}

/// Archive paths actually written; a side's archive is absent when its
/// required series weren't all present (logged, not an Experiment failure).
#[derive(Debug, Default)]
pub struct PairArtifactResult {
    pub dir: PathBuf,
    pub tx_archive: Option<PathBuf>,
    pub rx_archive: Option<PathBuf>,
}

/// `<results>/<ExperimentID>/<tx>-<rx>/<profile-basename>/`
pub fn pair_dir(results_dir: &Path, experiment_id: &ExperimentId, pair: &Pair, profile: &Profile) -> PathBuf {
    results_dir.join(experiment_id.as_str()).join(pair.dir_name()).join(profile.basename())
}

pub fn write_pair_artifacts(results_dir: &Path, inputs: PairArtifactInputs) -> Result<PairArtifactResult, ArtifactError> {
    let dir = pair_dir(results_dir, inputs.experiment_id, inputs.pair, inputs.profile);
    std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::Mkdir { path: dir.clone(), source })?;

    metadata::write(&dir.join("metadata.txt"), &inputs.metadata)?;

    let tx = inputs.pair.tx().name();
    let rx = inputs.pair.rx().name();

    if let Some(warmup) = inputs.warmup_log {
        write_file(&dir.join(format!("{tx}_warmup.log")), warmup)?;
    }
    write_file(&dir.join(format!("{tx}_stats.log")), inputs.rx_stats_log)?;
    write_file(&dir.join(format!("{tx}_port_rate_stats.csv")), inputs.tx_port_rate_csv)?;
    write_file(&dir.join(format!("{tx}_port_stats.csv")), inputs.tx_port_csv)?;

    let mut result = PairArtifactResult { dir: dir.clone(), tx_archive: None, rx_archive: None };

    let mut tx_series = parse::parse_kv_csv(inputs.tx_port_rate_csv, "");
    tx_series.extend(parse::parse_kv_csv(inputs.tx_port_csv, "port_"));
    bx_types::sample::pad_to_equal_length(&mut tx_series);
    result.tx_archive = try_write_archive(&dir, inputs.experiment_id, tx, Role::Tx, inputs.tx_cores, inputs.rx_cores, inputs.profile, inputs.timestamp, &tx_series)?;

    let rx_series = parse::parse_rx_log(inputs.rx_stats_log);
    result.rx_archive = try_write_archive(&dir, inputs.experiment_id, rx, Role::Rx, inputs.tx_cores, inputs.rx_cores, inputs.profile, inputs.timestamp, &rx_series)?;

    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn try_write_archive(
    dir: &Path,
    experiment_id: &ExperimentId,
    pod: &str,
    role: Role,
    tx_cores: u32,
    rx_cores: u32,
    profile: &Profile,
    timestamp: &str,
    series: &[SampleSeries],
) -> Result<Option<PathBuf>, ArtifactError> {
    if archive::validate_schema(role, series).is_err() {
        log::warn!("{pod}: missing required {role} series, suppressing archive for this pair");
        return Ok(None);
    }

    let name = ArchiveName {
        experiment_id: experiment_id.as_str().to_string(),
        pod: pod.to_string(),
        role,
        tx_cores,
        rx_cores,
        profile_basename: profile.basename(),
        timestamp: timestamp.to_string(),
    };
    let path = dir.join(name.render());
    archive::write_npz(&path, series)?;
    Ok(Some(path))
}

fn write_file(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    std::fs::write(path, contents).map_err(|source| ArtifactError::Write { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_types::workload::Workload;

    fn pair() -> Pair {
        Pair::new(
            Workload::new("tx0", "node-a", None, None, vec![0, 1]).unwrap(),
            Workload::new("rx0", "node-b", None, None, vec![0, 1]).unwrap(),
        )
        .unwrap()
    }

    fn profile() -> Profile {
        Profile::parse("profile_100_flows_pkt_size_512B_50_rate_s.lua").unwrap()
    }

    fn base_inputs<'a>(experiment_id: &'a ExperimentId, pair: &'a Pair, profile: &'a Profile) -> PairArtifactInputs<'a> {
        PairArtifactInputs {
            experiment_id,
            pair,
            profile,
            metadata: BTreeMap::from([("expid".to_string(), experiment_id.as_str().to_string())]),
            warmup_log: Some("warming up\n"),
            rx_stats_log: "Rx-pps: 100 Rx-bps: 800\nTx-pps: 100 Tx-bps: 800\nRX-packets: 99\n",
            tx_port_rate_csv: "2024-01-01T00:00:00,pkts_tx=1000\n",
            tx_port_csv: "2024-01-01T00:00:00,opackets=1000,obytes=64000\n",
            tx_cores: 3,
            rx_cores: 5,
            timestamp: "20250327_082320",
        }
    }

    #[test]
    fn writes_all_seven_files_when_both_sides_complete() {
        let dir = tempfile::tempdir().unwrap();
        let experiment_id = ExperimentId::derive("profile_x.lua", 1);
        let p = pair();
        let prof = profile();
        let result = write_pair_artifacts(dir.path(), base_inputs(&experiment_id, &p, &prof)).unwrap();

        assert!(result.dir.join("metadata.txt").exists());
        assert!(result.dir.join("tx0_warmup.log").exists());
        assert!(result.dir.join("tx0_stats.log").exists());
        assert!(result.dir.join("tx0_port_rate_stats.csv").exists());
        assert!(result.dir.join("tx0_port_stats.csv").exists());
        assert!(result.tx_archive.is_some());
        assert!(result.rx_archive.is_some());
        assert!(result.tx_archive.unwrap().exists());
        assert!(result.rx_archive.unwrap().exists());
    }

    #[test]
    fn absent_warmup_log_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let experiment_id = ExperimentId::derive("profile_x.lua", 1);
        let p = pair();
        let prof = profile();
        let mut inputs = base_inputs(&experiment_id, &p, &prof);
        inputs.warmup_log = None;
        let result = write_pair_artifacts(dir.path(), inputs).unwrap();
        assert!(!result.dir.join("tx0_warmup.log").exists());
    }

    #[test]
    fn missing_required_tx_series_suppresses_tx_archive_only() {
        let dir = tempfile::tempdir().unwrap();
        let experiment_id = ExperimentId::derive("profile_x.lua", 1);
        let p = pair();
        let prof = profile();
        let mut inputs = base_inputs(&experiment_id, &p, &prof);
        inputs.tx_port_rate_csv = "";
        inputs.tx_port_csv = "";
        let result = write_pair_artifacts(dir.path(), inputs).unwrap();
        assert!(result.tx_archive.is_none());
        assert!(result.rx_archive.is_some());
    }
}
