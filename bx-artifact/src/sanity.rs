//! `sanity` / `sanity --purge`: walks a results tree and reports, per
//! Experiment, whether every surviving Pair directory carries its full set
//! of artifacts.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanityError {
    #[error("walking {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("purging {path:?}: {source}")]
    Purge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The seven files a complete Pair directory must contain, relative to its
/// own directory (the two archive files are matched by suffix since their
/// names carry run-specific core counts and timestamps).
const REQUIRED_SUFFIXES: &[&str] = &[
    "metadata.txt",
    "_stats.log",
    "_port_rate_stats.csv",
    "_port_stats.csv",
];

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub path: PathBuf,
    pub valid: bool,
    pub missing: Vec<String>,
}

fn pair_dir_is_complete(pair_dir: &Path) -> Result<Vec<String>, SanityError> {
    let mut missing = Vec::new();
    let entries: Vec<PathBuf> = std::fs::read_dir(pair_dir)
        .map_err(|source| SanityError::Walk { path: pair_dir.to_path_buf(), source })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    let names: Vec<String> = entries.iter().filter_map(|p| p.file_name()?.to_str().map(String::from)).collect();

    for required in &["metadata.txt"] {
        if !names.iter().any(|n| n == required) || !is_non_empty(pair_dir.join(required)) {
            missing.push(required.to_string());
        }
    }
    for suffix in &REQUIRED_SUFFIXES[1..] {
        match names.iter().find(|n| n.ends_with(*suffix)) {
            Some(n) if is_non_empty(pair_dir.join(n)) => {}
            _ => missing.push(format!("*{suffix}")),
        }
    }
    if !names.iter().any(|n| n.contains("_tx_")) {
        missing.push("*_tx_*.npz".to_string());
    }
    if !names.iter().any(|n| n.contains("_rx_")) {
        missing.push("*_rx_*.npz".to_string());
    }

    Ok(missing)
}

fn is_non_empty(path: PathBuf) -> bool {
    std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Walks `results_dir/<experiment_id>/<pair>/<profile>/` and reports each
/// Experiment as valid only if every one of its Pair directories is
/// complete.
pub fn walk(results_dir: &Path) -> Result<Vec<ExperimentReport>, SanityError> {
    let mut reports = Vec::new();
    if !results_dir.is_dir() {
        return Ok(reports);
    }

    for experiment_entry in std::fs::read_dir(results_dir).map_err(|source| SanityError::Walk { path: results_dir.to_path_buf(), source })? {
        let experiment_entry = experiment_entry.map_err(|source| SanityError::Walk { path: results_dir.to_path_buf(), source })?;
        let experiment_path = experiment_entry.path();
        if !experiment_path.is_dir() {
            continue;
        }
        let experiment_id = experiment_path.file_name().unwrap().to_string_lossy().to_string();

        let mut all_missing = Vec::new();
        for pair_entry in walk_dirs(&experiment_path)? {
            for profile_entry in walk_dirs(&pair_entry)? {
                all_missing.extend(pair_dir_is_complete(&profile_entry)?);
            }
        }

        reports.push(ExperimentReport {
            valid: all_missing.is_empty(),
            experiment_id,
            path: experiment_path,
            missing: all_missing,
        });
    }

    reports.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));
    Ok(reports)
}

fn walk_dirs(path: &Path) -> Result<Vec<PathBuf>, SanityError> {
    Ok(std::fs::read_dir(path)
        .map_err(|source| SanityError::Walk { path: path.to_path_buf(), source })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

/// Deletes every Experiment directory not reported valid. Idempotent: a
/// second run on an already-purged (all-valid) tree deletes nothing.
pub fn purge(results_dir: &Path, reports: &[ExperimentReport]) -> Result<usize, SanityError> {
    let mut removed = 0;
    for report in reports {
        if !report.valid {
            std::fs::remove_dir_all(&report.path).map_err(|source| SanityError::Purge { path: report.path.clone(), source })?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_complete_pair_dir(root: &Path, experiment_id: &str, pair: &str, profile: &str) -> PathBuf {
        let dir = root.join(experiment_id).join(pair).join(profile);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.txt"), "expid=abc\n").unwrap();
        std::fs::write(dir.join("tx0_stats.log"), "log\n").unwrap();
        std::fs::write(dir.join("tx0_port_rate_stats.csv"), "a,b\n").unwrap();
        std::fs::write(dir.join("tx0_port_stats.csv"), "a,b\n").unwrap();
        std::fs::write(dir.join(format!("{experiment_id}_tx0_tx_txcores_1_rxcores_1_spec_p_20250101_000000.npz")), "x").unwrap();
        std::fs::write(dir.join(format!("{experiment_id}_rx0_rx_txcores_1_rxcores_1_spec_p_20250101_000000.npz")), "x").unwrap();
        dir
    }

    #[test]
    fn reports_complete_experiment_as_valid() {
        let root = tempfile::tempdir().unwrap();
        make_complete_pair_dir(root.path(), "abc12345", "tx0-rx0", "profile_p");
        let reports = walk(root.path()).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].valid);
    }

    #[test]
    fn reports_incomplete_experiment_as_invalid() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_complete_pair_dir(root.path(), "abc12345", "tx0-rx0", "profile_p");
        std::fs::remove_file(dir.join("tx0_port_stats.csv")).unwrap();
        let reports = walk(root.path()).unwrap();
        assert!(!reports[0].valid);
        assert!(reports[0].missing.iter().any(|m| m.contains("port_stats")));
    }

    #[test]
    fn purge_removes_only_invalid_experiments_and_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        make_complete_pair_dir(root.path(), "good0001", "tx0-rx0", "profile_p");
        let bad_dir = make_complete_pair_dir(root.path(), "bad00001", "tx0-rx0", "profile_p");
        std::fs::remove_file(bad_dir.join("metadata.txt")).unwrap();

        let reports = walk(root.path()).unwrap();
        let removed = purge(root.path(), &reports).unwrap();
        assert_eq!(removed, 1);
        assert!(root.path().join("good0001").exists());
        assert!(!root.path().join("bad00001").exists());

        let reports = walk(root.path()).unwrap();
        let removed_again = purge(root.path(), &reports).unwrap();
        assert_eq!(removed_again, 0);
    }
}
