//! Parsed-archive filename grammar and the npz read/write backing it.

use std::fmt;
use std::path::Path;

use bx_types::SampleSeries;
use ndarray::Array1;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("filename {0:?} does not match the archive grammar")]
    BadGrammar(String),
    #[error("unrecognized role token {0:?}")]
    BadRole(String),
    #[error("bad integer field in filename {0:?}")]
    BadInt(String),
    #[error("writing npz {path:?}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error on {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading npz {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },
    #[error("missing required series {0:?}")]
    MissingSeries(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Tx,
    Rx,
}

impl Role {
    fn as_token(&self) -> &'static str {
        match self {
            Role::Tx => "tx",
            Role::Rx => "rx",
        }
    }

    /// The series every archive of this role must carry.
    pub fn required_series(&self) -> &'static [&'static str] {
        match self {
            Role::Tx => &["pkts_tx", "port_opackets", "port_obytes"],
            Role::Rx => &["rx_pps", "rx_packets", "rx_bytes"],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// `<ExperimentID>_<podname>_<tx|rx>_txcores_<n>_rxcores_<n>_spec_<profile-basename>_<YYYYMMDD_HHMMSS>.npz`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub experiment_id: String,
    pub pod: String,
    pub role: Role,
    pub tx_cores: u32,
    pub rx_cores: u32,
    pub profile_basename: String,
    pub timestamp: String,
}

impl ArchiveName {
    pub fn render(&self) -> String {
        format!(
            "{}_{}_{}_txcores_{}_rxcores_{}_spec_{}_{}.npz",
            self.experiment_id, self.pod, self.role, self.tx_cores, self.rx_cores, self.profile_basename, self.timestamp
        )
    }

    /// Parses the filename grammar: `parts[0]`=expid, `[1]`=pod, `[2]`=role,
    /// then scans for the `txcores`/`rxcores`/`profile`/`pkt`/`rate` marker
    /// tokens, mirroring the original report generator's tolerant parse.
    pub fn parse(name: &str) -> Result<Self, ArchiveError> {
        let stem = name.strip_suffix(".npz").ok_or_else(|| ArchiveError::BadGrammar(name.to_string()))?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 8 {
            return Err(ArchiveError::BadGrammar(name.to_string()));
        }

        let experiment_id = parts[0].to_string();
        let pod = parts[1].to_string();
        let role = match parts[2] {
            "tx" => Role::Tx,
            "rx" => Role::Rx,
            other => return Err(ArchiveError::BadRole(other.to_string())),
        };

        let mut tx_cores = None;
        let mut rx_cores = None;
        let mut profile_idx = None;
        for (i, part) in parts.iter().enumerate() {
            match *part {
                "txcores" => tx_cores = parts.get(i + 1).map(|s| s.to_string()),
                "rxcores" => rx_cores = parts.get(i + 1).map(|s| s.to_string()),
                "spec" => profile_idx = Some(i + 1),
                _ => {}
            }
        }

        let tx_cores: u32 = tx_cores
            .as_deref()
            .ok_or_else(|| ArchiveError::BadGrammar(name.to_string()))?
            .parse()
            .map_err(|_| ArchiveError::BadInt(name.to_string()))?;
        let rx_cores: u32 = rx_cores
            .as_deref()
            .ok_or_else(|| ArchiveError::BadGrammar(name.to_string()))?
            .parse()
            .map_err(|_| ArchiveError::BadInt(name.to_string()))?;
        let profile_idx = profile_idx.ok_or_else(|| ArchiveError::BadGrammar(name.to_string()))?;

        // timestamp is the trailing "<YYYYMMDD>_<HHMMSS>" pair; everything
        // between the profile marker and the timestamp is the basename.
        if parts.len() < profile_idx + 3 {
            return Err(ArchiveError::BadGrammar(name.to_string()));
        }
        let timestamp_start = parts.len() - 2;
        let profile_basename = parts[profile_idx..timestamp_start].join("_");
        let timestamp = parts[timestamp_start..].join("_");

        Ok(ArchiveName {
            experiment_id,
            pod,
            role,
            tx_cores,
            rx_cores,
            profile_basename,
            timestamp,
        })
    }
}

/// Writes `series` to `path` as a named-series npz archive.
pub fn write_npz(path: &Path, series: &[SampleSeries]) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(path).map_err(|source| ArchiveError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ndarray_npy::NpzWriter::new(file);
    for s in series {
        let array: Array1<i64> = Array1::from_vec(s.values().to_vec());
        writer.add_array(s.name(), &array).map_err(|e| ArchiveError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
    }
    writer.finish().map_err(|e| ArchiveError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;
    Ok(())
}

/// Reads every named series back out of an npz archive.
pub fn read_npz(path: &Path) -> Result<Vec<SampleSeries>, ArchiveError> {
    let file = std::fs::File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ndarray_npy::NpzReader::new(file).map_err(|source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let names = reader.names().map_err(|source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for name in names {
        let array: Array1<i64> = reader.by_name(name.as_str()).map_err(|source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        out.push(SampleSeries::new(name, array.iter().copied().collect()));
    }
    Ok(out)
}

/// Checks that every series in `Role::required_series()` is present and
/// non-empty.
pub fn validate_schema(role: Role, series: &[SampleSeries]) -> Result<(), ArchiveError> {
    for required in role.required_series() {
        match series.iter().find(|s| s.name() == *required) {
            Some(s) if !s.is_empty() => {}
            _ => return Err(ArchiveError::MissingSeries(required.to_string())),
        }
    }
    Ok(())
}
