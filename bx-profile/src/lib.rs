//! C2 Profile Distributor: bundles the profile scripts for one (tx, rx)
//! pair plus the sampling helper into a single tar archive and extracts it
//! at the root of the TX workload's filesystem.

pub mod sweep;
pub mod template;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bx_cluster::ClusterClient;
use bx_types::pair::Pair;
use thiserror::Error;

/// The sampling helper script bundled into every profile archive, bundled
/// verbatim rather than templated (it carries no per-pair parameters).
pub const SAMPLE_HELPER_LUA: &str = include_str!("assets/sample_helper.lua");
pub const STOP_HELPER_LUA: &str = include_str!("assets/stop_helper.lua");
pub const SAMPLE_HELPER_NAME: &str = "sample_helper.lua";
pub const STOP_HELPER_NAME: &str = "stop_helper.lua";

const REMOTE_BUNDLE_PATH: &str = "/tmp/bx-profile-bundle.tar";

#[derive(Debug, Error)]
pub enum DistributeError {
    #[error("building archive for {pod:?}: {source}")]
    Archive {
        pod: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cluster error distributing to {pod:?}: {source}")]
    Cluster {
        pod: String,
        #[source]
        source: bx_cluster::ClusterError,
    },
    #[error("extracting archive on {pod:?} failed: {stderr}")]
    ExtractFailed { pod: String, stderr: String },
}

/// Builds the tar bundle for one pair: every `.lua` file directly under
/// `profile_dir` plus the sampling and stop helpers.
fn build_bundle(profile_dir: &Path) -> Result<Vec<u8>, std::io::Error> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);

        if profile_dir.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(profile_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("lua"))
                .collect();
            entries.sort();
            for path in entries {
                let name = path.file_name().unwrap().to_string_lossy().to_string();
                append_bytes(&mut builder, &name, &std::fs::read(&path)?)?;
            }
        }

        append_bytes(&mut builder, SAMPLE_HELPER_NAME, SAMPLE_HELPER_LUA.as_bytes())?;
        append_bytes(&mut builder, STOP_HELPER_NAME, STOP_HELPER_LUA.as_bytes())?;
        builder.finish()?;
    }
    Ok(buf)
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<(), std::io::Error> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)
}

/// Bundles and transfers the profile archive for every TX workload in
/// `pairs`, fanned out in parallel — one archive per TX workload. A no-op
/// per pair when `skip` is set.
pub async fn distribute(
    cluster: Arc<dyn ClusterClient>,
    pairs: &[Pair],
    profile_dir: &Path,
    skip: bool,
) -> Result<(), DistributeError> {
    if skip {
        log::info!("profile distribution skipped (skip-copy)");
        return Ok(());
    }

    let bundle = build_bundle(profile_dir).map_err(|source| DistributeError::Archive {
        pod: "<bundle>".to_string(),
        source,
    })?;

    let mut join_set = tokio::task::JoinSet::new();
    for pair in pairs {
        let cluster = cluster.clone();
        let bundle = bundle.clone();
        let pod = pair.tx().name().to_string();
        join_set.spawn(async move { distribute_one(cluster.as_ref(), &pod, &bundle) });
    }

    while let Some(joined) = join_set.join_next().await {
        joined.expect("distribute task panicked")?;
    }
    Ok(())
}

fn distribute_one(cluster: &dyn ClusterClient, pod: &str, bundle: &[u8]) -> Result<(), DistributeError> {
    let tmp = tempfile::NamedTempFile::new().map_err(|source| DistributeError::Archive {
        pod: pod.to_string(),
        source,
    })?;
    std::fs::write(tmp.path(), bundle).map_err(|source| DistributeError::Archive {
        pod: pod.to_string(),
        source,
    })?;

    cluster
        .cp_to(tmp.path(), pod, REMOTE_BUNDLE_PATH)
        .map_err(|source| DistributeError::Cluster {
            pod: pod.to_string(),
            source,
        })?;

    let output = cluster
        .exec(pod, &["tar", "-xf", REMOTE_BUNDLE_PATH, "-C", "/"])
        .map_err(|source| DistributeError::Cluster {
            pod: pod.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(DistributeError::ExtractFailed {
            pod: pod.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_cluster::fake::FakeClusterClient;
    use bx_cluster::PodInfo;
    use bx_types::workload::Workload;

    fn pair(tx: &str, rx: &str) -> Pair {
        Pair::new(
            Workload::new(tx, "node-a", None, None, vec![0, 1]).unwrap(),
            Workload::new(rx, "node-b", None, None, vec![0, 1]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn bundle_contains_helpers_even_with_no_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_bundle(dir.path()).unwrap();
        let mut archive = tar::Archive::new(bundle.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&SAMPLE_HELPER_NAME.to_string()));
        assert!(names.contains(&STOP_HELPER_NAME.to_string()));
    }

    #[tokio::test]
    async fn skip_is_a_no_op() {
        let client: Arc<dyn ClusterClient> = Arc::new(FakeClusterClient::new(vec![]));
        let pairs = vec![pair("tx0", "rx0")];
        distribute(client, &pairs, Path::new("/nonexistent"), true).await.unwrap();
    }

    #[tokio::test]
    async fn distributes_to_every_tx_pod() {
        let client = FakeClusterClient::new(vec![
            PodInfo { name: "tx0".to_string(), node_name: "node-a".to_string() },
            PodInfo { name: "tx1".to_string(), node_name: "node-a".to_string() },
        ]);
        client.stub_exec("tx0", &["tar", "-xf", REMOTE_BUNDLE_PATH, "-C", "/"], 0, b"", b"");
        client.stub_exec("tx1", &["tar", "-xf", REMOTE_BUNDLE_PATH, "-C", "/"], 0, b"", b"");
        let client: Arc<dyn ClusterClient> = Arc::new(client);

        let pairs = vec![pair("tx0", "rx0"), pair("tx1", "rx1")];
        distribute(client, &pairs, Path::new("/nonexistent"), false).await.unwrap();
    }

    #[tokio::test]
    async fn extraction_failure_surfaces() {
        let client = FakeClusterClient::new(vec![]);
        client.stub_exec("tx0", &["tar", "-xf", REMOTE_BUNDLE_PATH, "-C", "/"], 1, b"", b"disk full");
        let client: Arc<dyn ClusterClient> = Arc::new(client);

        let pairs = vec![pair("tx0", "rx0")];
        let err = distribute(client, &pairs, Path::new("/nonexistent"), false).await.unwrap_err();
        assert!(matches!(err, DistributeError::ExtractFailed { .. }));
    }
}
