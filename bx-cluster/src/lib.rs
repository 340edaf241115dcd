//! The cluster collaborator: pod enumeration, exec, and file copy against a
//! container-orchestrator namespace. Out of scope per the specification's
//! §1 "external collaborators" list, but a concrete `kubectl`-backed
//! implementation is provided so the orchestrator core has something real
//! to drive in tests and in the field.
//!
//! Every command is built as an argv list and handed to `std::process::Command`
//! directly — never assembled as a shell string — per the anti-pattern called
//! out for shell-string interpolation.

use std::path::Path;
use std::process::{Command, Output};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program:?} {args:?} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        args: Vec<String>,
        status: String,
        stderr: String,
    },
    #[error("failed to parse kubectl output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One pod as reported by the cluster: name, the node it's scheduled on,
/// and that node's hypervisor label (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub node_name: String,
}

/// The cluster-exec/cp/label-lookup collaborator consumed by the Topology
/// Resolver, Profile Distributor, and Receiver/Generator drivers.
pub trait ClusterClient: Send + Sync {
    /// Lists pods in the target namespace.
    fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError>;

    /// Runs `argv` inside `pod` and returns the completed process output.
    /// Never fails merely because the remote command exited non-zero —
    /// callers inspect `Output::status` themselves; it fails only if the
    /// local `kubectl` invocation itself could not be spawned/parsed.
    fn exec(&self, pod: &str, argv: &[&str]) -> Result<Output, ClusterError>;

    /// Copies a local file into `pod` at `remote_path`.
    fn cp_to(&self, local_path: &Path, pod: &str, remote_path: &str) -> Result<(), ClusterError>;

    /// Copies `remote_path` out of `pod` to `local_path`.
    fn cp_from(&self, pod: &str, remote_path: &str, local_path: &Path) -> Result<(), ClusterError>;

    /// Reads a label's value off a node; `None` if absent.
    fn node_label(&self, node_name: &str, key: &str) -> Result<Option<String>, ClusterError>;
}

/// Thin `kubectl` subprocess adapter. No connection reuse — each call is a
/// fresh `kubectl` invocation, matching how the source script drives it.
pub struct KubectlClient {
    namespace: Option<String>,
}

impl KubectlClient {
    pub fn new(namespace: Option<String>) -> Self {
        KubectlClient { namespace }
    }

    fn base_args(&self) -> Vec<String> {
        match &self.namespace {
            Some(ns) => vec!["-n".to_string(), ns.clone()],
            None => vec![],
        }
    }

    fn run(&self, args: &[String]) -> Result<Output, ClusterError> {
        log::debug!("kubectl {}", args.join(" "));
        Command::new("kubectl")
            .args(args)
            .output()
            .map_err(|source| ClusterError::Spawn {
                program: "kubectl".to_string(),
                source,
            })
    }

    fn run_checked(&self, args: Vec<String>) -> Result<Output, ClusterError> {
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                program: "kubectl".to_string(),
                args,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(output)
    }
}

impl ClusterClient for KubectlClient {
    fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError> {
        let mut args = self.base_args();
        args.extend(["get".to_string(), "pods".to_string(), "-o".to_string(), "json".to_string()]);
        let output = self.run_checked(args)?;

        #[derive(Deserialize)]
        struct PodList {
            items: Vec<PodItem>,
        }
        #[derive(Deserialize)]
        struct PodItem {
            metadata: PodMeta,
            spec: PodSpec,
        }
        #[derive(Deserialize)]
        struct PodMeta {
            name: String,
        }
        #[derive(Deserialize)]
        struct PodSpec {
            #[serde(rename = "nodeName", default)]
            node_name: String,
        }

        let parsed: PodList = serde_json::from_slice(&output.stdout)?;
        Ok(parsed
            .items
            .into_iter()
            .map(|item| PodInfo {
                name: item.metadata.name,
                node_name: item.spec.node_name,
            })
            .collect())
    }

    fn exec(&self, pod: &str, argv: &[&str]) -> Result<Output, ClusterError> {
        let mut args = self.base_args();
        args.push("exec".to_string());
        args.push(pod.to_string());
        args.push("--".to_string());
        args.extend(argv.iter().map(|s| s.to_string()));
        self.run(&args)
    }

    fn cp_to(&self, local_path: &Path, pod: &str, remote_path: &str) -> Result<(), ClusterError> {
        let mut args = self.base_args();
        args.push("cp".to_string());
        args.push(local_path.display().to_string());
        args.push(format!("{pod}:{remote_path}"));
        self.run_checked(args)?;
        Ok(())
    }

    fn cp_from(&self, pod: &str, remote_path: &str, local_path: &Path) -> Result<(), ClusterError> {
        let mut args = self.base_args();
        args.push("cp".to_string());
        args.push(format!("{pod}:{remote_path}"));
        args.push(local_path.display().to_string());
        self.run_checked(args)?;
        Ok(())
    }

    fn node_label(&self, node_name: &str, key: &str) -> Result<Option<String>, ClusterError> {
        let mut args = self.base_args();
        args.extend([
            "get".to_string(),
            "node".to_string(),
            node_name.to_string(),
            "-o".to_string(),
            format!("jsonpath={{.metadata.labels.{key}}}"),
        ]);
        let output = self.run_checked(args)?;
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }
}

/// In-memory fake used by every other crate's test suite. Never touches a
/// subprocess.
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeClusterClient {
        pub pods: Vec<PodInfo>,
        pub node_labels: HashMap<String, String>,
        /// `(pod, argv)` -> `(exit_code, stdout, stderr)`; unmatched execs
        /// succeed with empty output.
        pub exec_responses: Mutex<HashMap<(String, Vec<String>), (i32, Vec<u8>, Vec<u8>)>>,
        pub copies_in: Mutex<Vec<(String, String)>>,
        pub copies_out: Mutex<Vec<(String, String)>>,
    }

    impl FakeClusterClient {
        pub fn new(pods: Vec<PodInfo>) -> Self {
            FakeClusterClient {
                pods,
                ..Default::default()
            }
        }

        pub fn with_node_label(mut self, node: &str, key: &str, value: &str) -> Self {
            self.node_labels.insert(format!("{node}/{key}"), value.to_string());
            self
        }

        pub fn stub_exec(&self, pod: &str, argv: &[&str], exit_code: i32, stdout: &[u8], stderr: &[u8]) {
            let key = (pod.to_string(), argv.iter().map(|s| s.to_string()).collect());
            self.exec_responses
                .lock()
                .unwrap()
                .insert(key, (exit_code, stdout.to_vec(), stderr.to_vec()));
        }
    }

    impl ClusterClient for FakeClusterClient {
        fn list_pods(&self) -> Result<Vec<PodInfo>, ClusterError> {
            Ok(self.pods.clone())
        }

        fn exec(&self, pod: &str, argv: &[&str]) -> Result<Output, ClusterError> {
            let key = (pod.to_string(), argv.iter().map(|s| s.to_string()).collect());
            let (code, stdout, stderr) = self
                .exec_responses
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or((0, Vec::new(), Vec::new()));
            Ok(Output {
                status: ExitStatus::from_raw(code << 8),
                stdout,
                stderr,
            })
        }

        fn cp_to(&self, local_path: &Path, pod: &str, remote_path: &str) -> Result<(), ClusterError> {
            self.copies_in
                .lock()
                .unwrap()
                .push((local_path.display().to_string(), format!("{pod}:{remote_path}")));
            Ok(())
        }

        fn cp_from(&self, pod: &str, remote_path: &str, local_path: &Path) -> Result<(), ClusterError> {
            self.copies_out
                .lock()
                .unwrap()
                .push((format!("{pod}:{remote_path}"), local_path.display().to_string()));
            Ok(())
        }

        fn node_label(&self, node_name: &str, key: &str) -> Result<Option<String>, ClusterError> {
            Ok(self.node_labels.get(&format!("{node_name}/{key}")).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClusterClient;
    use super::*;

    #[test]
    fn fake_lists_seeded_pods() {
        let client = FakeClusterClient::new(vec![PodInfo {
            name: "tx0".to_string(),
            node_name: "node-a".to_string(),
        }]);
        let pods = client.list_pods().unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "tx0");
    }

    #[test]
    fn fake_exec_returns_stubbed_output() {
        let client = FakeClusterClient::new(vec![]);
        client.stub_exec("tx0", &["pgrep", "dpdk-testpmd"], 1, b"", b"no process\n");
        let out = client.exec("tx0", &["pgrep", "dpdk-testpmd"]).unwrap();
        assert!(!out.status.success());
        assert_eq!(out.stderr, b"no process\n");
    }

    #[test]
    fn fake_node_label_lookup() {
        let client = FakeClusterClient::new(vec![]).with_node_label("node-a", "hypervisor-id", "esx01");
        assert_eq!(
            client.node_label("node-a", "hypervisor-id").unwrap(),
            Some("esx01".to_string())
        );
        assert_eq!(client.node_label("node-b", "hypervisor-id").unwrap(), None);
    }
}
