//! Remote command channel.
//!
//! A `RemoteShell` is one authenticated session to a host. Pipelines only talk
//! to the trait; `SshConnector` opens real sessions through the system OpenSSH
//! client and the `testing` module provides a scripted double.

pub mod key;
pub mod ssh;

use crate::errors::{ChannelError, PipelineError};
use crate::ledger::HostDescriptor;
use async_trait::async_trait;
use std::time::Duration;

pub use ssh::{SshConnector, SshSession};

/// Exit status and captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if present, otherwise stdout; used when surfacing a failure.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run a command and wait for it, bounded by `timeout`.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError>;

    /// Launch a detached process and return without waiting for it.
    async fn run_background(&self, command: &str) -> Result<(), ChannelError>;

    /// Write `content` to `remote_path` over a separate transfer channel.
    async fn upload_text(&self, remote_path: &str, content: &str) -> Result<(), ChannelError>;

    /// Tear the session down. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        host: &HostDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteShell>, ChannelError>;
}

/// Run a pipeline step: a non-zero exit becomes `PipelineError::Command`
/// carrying the command and its stderr.
pub async fn run_checked(
    shell: &dyn RemoteShell,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, PipelineError> {
    let output = shell.run(command, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(PipelineError::Command {
            command: scrub_credentials(command),
            exit_code: output.exit_code,
            stderr: scrub_credentials(output.diagnostic()),
        })
    }
}

/// Mask the userinfo of every `scheme://user@host` URL in `text`.
///
/// Commands can embed access tokens in clone URLs; anything that leaves the
/// channel as a log line or error text goes through here first.
pub fn scrub_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c == '\'' || c == '"' || c.is_whitespace())
            .unwrap_or(tail.len());
        match tail[..authority_end].rfind('@') {
            Some(at) => {
                out.push_str("****");
                rest = &tail[at..];
            }
            None => rest = tail,
        }
    }
    out.push_str(rest);
    out
}

/// Quote a value for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
pub mod testing {
    //! Scripted `RemoteShell` double.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Run(String),
        Background(String),
        Upload { path: String, content: String },
    }

    #[derive(Default)]
    struct State {
        rules: Vec<(String, CommandOutput)>,
        calls: Vec<Call>,
        closed: usize,
        fail_uploads: bool,
    }

    /// Commands matching a registered substring get the scripted output; all
    /// others succeed with empty output. The first matching rule wins.
    #[derive(Clone, Default)]
    pub struct ScriptedShell {
        state: Arc<Mutex<State>>,
    }

    impl ScriptedShell {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
            self.state.lock().unwrap().rules.push((
                pattern.to_string(),
                CommandOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            ));
            self
        }

        pub fn failing_uploads(self) -> Self {
            self.state.lock().unwrap().fail_uploads = true;
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Run(cmd) | Call::Background(cmd) => Some(cmd),
                    Call::Upload { .. } => None,
                })
                .collect()
        }

        pub fn uploads(&self) -> Vec<(String, String)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Upload { path, content } => Some((path, content)),
                    _ => None,
                })
                .collect()
        }

        pub fn ran(&self, needle: &str) -> bool {
            self.commands().iter().any(|c| c.contains(needle))
        }

        pub fn close_count(&self) -> usize {
            self.state.lock().unwrap().closed
        }
    }

    #[async_trait]
    impl RemoteShell for ScriptedShell {
        async fn run(
            &self,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput, ChannelError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Run(command.to_string()));
            Ok(state
                .rules
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default())
        }

        async fn run_background(&self, command: &str) -> Result<(), ChannelError> {
            self.state
                .lock()
                .unwrap()
                .calls
                .push(Call::Background(command.to_string()));
            Ok(())
        }

        async fn upload_text(&self, remote_path: &str, content: &str) -> Result<(), ChannelError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_uploads {
                return Err(ChannelError::Transfer {
                    path: remote_path.to_string(),
                    message: "Permission denied".to_string(),
                });
            }
            state.calls.push(Call::Upload {
                path: remote_path.to_string(),
                content: content.to_string(),
            });
            Ok(())
        }

        async fn close(&self) -> Result<(), ChannelError> {
            self.state.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    /// Hands out clones of one `ScriptedShell`, or fails every open.
    pub struct ScriptedConnector {
        pub shell: ScriptedShell,
        pub fail_with: Mutex<Option<ChannelError>>,
        pub opened: Mutex<usize>,
    }

    impl ScriptedConnector {
        pub fn new(shell: ScriptedShell) -> Self {
            Self {
                shell,
                fail_with: Mutex::new(None),
                opened: Mutex::new(0),
            }
        }

        pub fn failing(error: ChannelError) -> Self {
            Self {
                shell: ScriptedShell::new(),
                fail_with: Mutex::new(Some(error)),
                opened: Mutex::new(0),
            }
        }

        pub fn open_count(&self) -> usize {
            *self.opened.lock().unwrap()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(
            &self,
            _host: &HostDescriptor,
            _timeout: Duration,
        ) -> Result<Box<dyn RemoteShell>, ChannelError> {
            *self.opened.lock().unwrap() += 1;
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            Ok(Box::new(self.shell.clone()))
        }
    }
}
