//! The remote-shell collaborator: execute a command on a hypervisor host
//! over SSH and read back its exit status/stdout/stderr. Out of scope per
//! the specification's external-collaborator list, but backed here by a
//! concrete `ssh2` adapter so the Connection Pool and Hypervisor Sampler
//! have something real to drive.

use std::io::Read;
use std::net::TcpStream;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RexecError {
    #[error("connecting to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: ssh2::Error,
    },
    #[error("authentication to {host} as {username} failed: {source}")]
    Auth {
        host: String,
        username: String,
        #[source]
        source: ssh2::Error,
    },
    #[error("remote exec on {host} failed: {source}")]
    Exec {
        host: String,
        #[source]
        source: ssh2::Error,
    },
}

/// The result of one remote command: exit status plus captured streams.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// One live connection to a remote host, capable of running commands and
/// reporting whether its transport is still usable.
pub trait RemoteShell: Send {
    fn exec(&mut self, command: &str) -> Result<RemoteOutput, RexecError>;

    /// Cheap liveness probe used by the Connection Pool to decide whether
    /// to discard and reconnect.
    fn is_alive(&mut self) -> bool;

    fn host(&self) -> &str;
}

/// `ssh2`-backed shell. One TCP connection, one authenticated session,
/// keepalive enabled at construction time (§4.6: "sessions carry keepalive
/// = 30s").
pub struct SshShell {
    host: String,
    session: ssh2::Session,
}

impl SshShell {
    pub fn connect(host: &str, port: u16, username: &str, password: &str) -> Result<Self, RexecError> {
        let tcp = TcpStream::connect((host, port)).map_err(|source| RexecError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;

        let mut session = ssh2::Session::new().map_err(|source| RexecError::Handshake {
            host: host.to_string(),
            source,
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|source| RexecError::Handshake {
            host: host.to_string(),
            source,
        })?;
        session
            .userauth_password(username, password)
            .map_err(|source| RexecError::Auth {
                host: host.to_string(),
                username: username.to_string(),
                source,
            })?;
        session.set_keepalive(true, 30);

        Ok(SshShell {
            host: host.to_string(),
            session,
        })
    }
}

impl RemoteShell for SshShell {
    fn exec(&mut self, command: &str) -> Result<RemoteOutput, RexecError> {
        let mut channel = self.session.channel_session().map_err(|source| RexecError::Exec {
            host: self.host.clone(),
            source,
        })?;
        channel.exec(command).map_err(|source| RexecError::Exec {
            host: self.host.clone(),
            source,
        })?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).ok();
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().map_err(|source| RexecError::Exec {
            host: self.host.clone(),
            source,
        })?;
        let exit_status = channel.exit_status().unwrap_or(-1);

        Ok(RemoteOutput {
            exit_status,
            stdout,
            stderr,
        })
    }

    fn is_alive(&mut self) -> bool {
        self.session.keepalive_send().is_ok()
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// In-memory fake used by the Connection Pool and Hypervisor Sampler test
/// suites. Never opens a socket.
pub mod fake {
    use super::*;
    use std::collections::VecDeque;

    pub struct FakeShell {
        pub host: String,
        pub alive: bool,
        pub responses: VecDeque<RemoteOutput>,
        pub commands: Vec<String>,
    }

    impl FakeShell {
        pub fn new(host: &str, responses: Vec<RemoteOutput>) -> Self {
            FakeShell {
                host: host.to_string(),
                alive: true,
                responses: responses.into(),
                commands: Vec::new(),
            }
        }
    }

    impl RemoteShell for FakeShell {
        fn exec(&mut self, command: &str) -> Result<RemoteOutput, RexecError> {
            self.commands.push(command.to_string());
            Ok(self.responses.pop_front().unwrap_or(RemoteOutput {
                exit_status: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn host(&self) -> &str {
            &self.host
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeShell;
    use super::*;

    #[test]
    fn fake_shell_replays_queued_responses_in_order() {
        let mut shell = FakeShell::new(
            "esx01",
            vec![
                RemoteOutput {
                    exit_status: 0,
                    stdout: "first".to_string(),
                    stderr: String::new(),
                },
                RemoteOutput {
                    exit_status: 1,
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                },
            ],
        );
        let first = shell.exec("echo first").unwrap();
        assert!(first.success());
        assert_eq!(first.stdout, "first");

        let second = shell.exec("false").unwrap();
        assert!(!second.success());
        assert_eq!(shell.commands, vec!["echo first", "false"]);
    }

    #[test]
    fn fake_shell_alive_flag_controls_liveness() {
        let mut shell = FakeShell::new("esx01", vec![]);
        assert!(shell.is_alive());
        shell.alive = false;
        assert!(!shell.is_alive());
    }
}
