//! `metadata.txt`: ASCII `key=value`, one per line, blank/`#`-prefixed
//! lines ignored.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("writing {path:?}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn write(path: &Path, fields: &BTreeMap<String, String>) -> Result<(), MetadataError> {
    let mut body = String::new();
    for (k, v) in fields {
        body.push_str(&format!("{k}={v}\n"));
    }
    std::fs::write(path, body).map_err(|source| MetadataError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read(path: &Path) -> Result<BTreeMap<String, String>, MetadataError> {
    let text = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse(&text))
}

fn parse(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    out
}

/// Required keys for a complete `metadata.txt`.
pub const REQUIRED_KEYS: &[&str] = &[
    "expid", "timestamp", "profile", "tx_pod", "rx_pod", "tx_node", "rx_node", "tx_mac", "rx_mac", "tx_numa", "rx_numa",
];

pub fn has_required_keys(fields: &BTreeMap<String, String>) -> bool {
    REQUIRED_KEYS.iter().all(|k| fields.contains_key(*k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        let mut fields = BTreeMap::new();
        fields.insert("expid".to_string(), "44d72c38".to_string());
        fields.insert("tx_pod".to_string(), "tx0".to_string());
        write(&path, &fields).unwrap();
        let read_back = read(&path).unwrap();
        assert_eq!(read_back, fields);
    }

    #[test]
    fn ignores_blank_and_comment_lines() {
        let parsed = parse("# comment\n\nexpid=abc\n  \nprofile=p.lua\n");
        assert_eq!(parsed.get("expid").unwrap(), "abc");
        assert_eq!(parsed.get("profile").unwrap(), "p.lua");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn detects_missing_required_keys() {
        let mut fields = BTreeMap::new();
        fields.insert("expid".to_string(), "abc".to_string());
        assert!(!has_required_keys(&fields));
    }
}
