//! `RemoteShell` over the system OpenSSH client.
//!
//! `open` starts a background control master (`-f -N`) bound to a socket in a private
//! temp directory; every later command multiplexes over that socket, so the
//! host authenticates once per session. The temp directory also holds the key
//! file and is removed when the session is dropped.

use super::key::PrivateKey;
use super::{CommandOutput, Connector, RemoteShell, scrub_credentials, shell_quote};
use crate::errors::ChannelError;
use crate::ledger::HostDescriptor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Opens `SshSession`s using the given ssh binary.
#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh_bin: String,
}

impl SshConnector {
    pub fn new(ssh_bin: impl Into<String>) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new("ssh")
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(
        &self,
        host: &HostDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteShell>, ChannelError> {
        let session = SshSession::open(&self.ssh_bin, host, timeout).await?;
        Ok(Box::new(session))
    }
}

pub struct SshSession {
    ssh_bin: String,
    destination: String,
    host: String,
    user: String,
    control_path: PathBuf,
    closed: AtomicBool,
    // Holds the key file and control socket; removed on drop.
    _workdir: TempDir,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("destination", &self.destination)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SshSession {
    pub async fn open(
        ssh_bin: &str,
        host: &HostDescriptor,
        connect_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let key = PrivateKey::parse(&host.private_key)?;

        let workdir = tempfile::Builder::new()
            .prefix("shipyard-ssh-")
            .tempdir()
            .map_err(ChannelError::Spawn)?;
        let key_path = workdir.path().join("id");
        write_private_file(&key_path, key.as_pem()).map_err(ChannelError::Spawn)?;
        let control_path = workdir.path().join("ctl");
        let log_path = workdir.path().join("master.log");

        let destination = format!("{}@{}", host.user, host.address);
        let connect_secs = connect_timeout.as_secs().max(1);

        tracing::debug!(destination = %destination, "Opening ssh control master");

        let mut cmd = Command::new(ssh_bin);
        cmd.arg("-i")
            .arg(&key_path)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "IdentitiesOnly=yes"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_secs))
            .args(["-o", "ControlMaster=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .args(["-o", "ControlPersist=10m"])
            .arg("-E")
            .arg(&log_path)
            .args(["-f", "-N"])
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            // The forked master would hold a piped stderr open; diagnostics go to -E.
            .stderr(Stdio::null());

        // Give the client a little longer than its own ConnectTimeout.
        let wait = connect_timeout + Duration::from_secs(5);
        let status = match timeout(wait, cmd.status()).await {
            Ok(result) => result.map_err(ChannelError::Spawn)?,
            Err(_) => {
                return Err(ChannelError::Unreachable {
                    host: host.address.clone(),
                    message: format!("no response within {}s", connect_secs),
                });
            }
        };

        if !status.success() {
            let message = std::fs::read_to_string(&log_path).unwrap_or_default();
            return Err(classify_connect_failure(
                &host.address,
                &host.user,
                message.trim(),
            ));
        }

        Ok(Self {
            ssh_bin: ssh_bin.to_string(),
            destination,
            host: host.address.clone(),
            user: host.user.clone(),
            control_path,
            closed: AtomicBool::new(false),
            _workdir: workdir,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_bin);
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "LogLevel=ERROR"])
            .arg(&self.destination)
            .kill_on_drop(true);
        cmd
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn run(&self, command: &str, limit: Duration) -> Result<CommandOutput, ChannelError> {
        self.ensure_open()?;
        log_command(&self.host, "ssh run", command);

        let mut cmd = self.command();
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(ChannelError::Spawn)?,
            Err(_) => {
                return Err(ChannelError::Timeout {
                    command: scrub_credentials(command),
                    secs: limit.as_secs(),
                });
            }
        };

        // 255 is the ssh client's own failure code, not the remote command's.
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == 255 && stderr.contains("Control socket") {
            return Err(ChannelError::Unreachable {
                host: self.host.clone(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn run_background(&self, command: &str) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let detached = format!("nohup {} > /dev/null 2>&1 &", command);
        log_command(&self.host, "ssh background", &detached);

        let mut cmd = self.command();
        cmd.arg(&detached)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = timeout(Duration::from_secs(30), cmd.output())
            .await
            .map_err(|_| ChannelError::Launch {
                message: "ssh did not return after launching the process".into(),
            })?
            .map_err(ChannelError::Spawn)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ChannelError::Launch {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn upload_text(&self, remote_path: &str, content: &str) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let transfer_err = |message: String| ChannelError::Transfer {
            path: remote_path.to_string(),
            message,
        };

        // A dedicated channel for the transfer; it ends with this call.
        let mut cmd = self.command();
        cmd.arg(format!("cat > {}", shell_quote(remote_path)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(ChannelError::Spawn)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|e| transfer_err(e.to_string()))?;
        }

        let output = timeout(Duration::from_secs(60), child.wait_with_output())
            .await
            .map_err(|_| transfer_err("transfer timed out".into()))?
            .map_err(ChannelError::Spawn)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(transfer_err(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(host = %self.host, user = %self.user, "Closing ssh control master");
        let status = Command::new(&self.ssh_bin)
            .arg("-S")
            .arg(&self.control_path)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(error = %e, "Failed to stop ssh control master");
        }
        Ok(())
    }
}

fn log_command(host: &str, kind: &str, command: &str) {
    tracing::debug!(host = %host, command = %scrub_credentials(command), "{}", kind);
}

fn write_private_file(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())
}

/// Map ssh client diagnostics onto the channel error kinds.
fn classify_connect_failure(host: &str, user: &str, message: &str) -> ChannelError {
    let lower = message.to_lowercase();
    if lower.contains("invalid format")
        || lower.contains("load key")
        || lower.contains("libcrypto")
    {
        ChannelError::KeyParse(message.to_string())
    } else if lower.contains("permission denied") || lower.contains("too many authentication") {
        ChannelError::AuthFailed {
            user: user.to_string(),
            host: host.to_string(),
            message: message.to_string(),
        }
    } else {
        let message = if message.is_empty() {
            "ssh exited without output".to_string()
        } else {
            message.to_string()
        };
        ChannelError::Unreachable {
            host: host.to_string(),
            message,
        }
    }
}
