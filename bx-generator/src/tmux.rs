//! The terminal-multiplexer collaborator: a literal `tmux` session/window
//! pair created inside the TX workload, used so the generator keeps running
//! detached from the `kubectl exec` connection that launched it.

use bx_cluster::ClusterClient;

use crate::GeneratorError;

/// Starts `command` in a detached `tmux` window named after the workload,
/// inside a session named after the profile.
pub fn new_session(
    cluster: &dyn ClusterClient,
    pod: &str,
    session: &str,
    window: &str,
    command: &str,
) -> Result<(), GeneratorError> {
    let output = cluster
        .exec(pod, &["tmux", "new-session", "-d", "-s", session, "-n", window, command])
        .map_err(|source| GeneratorError::Cluster {
            pod: pod.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(GeneratorError::LaunchFailed {
            pod: pod.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Idempotent from the caller's perspective: failure to kill a session that
/// is already gone is not surfaced, matching `tmux kill-session`'s own
/// behavior of erroring on a missing session, which we treat as already torn
/// down.
pub fn kill_session(cluster: &dyn ClusterClient, pod: &str, session: &str) {
    if let Err(e) = cluster.exec(pod, &["tmux", "kill-session", "-t", session]) {
        log::debug!("tmux kill-session on {pod:?} (session {session:?}) ignored: {e}");
    }
}
