//! Batched remote command execution over `ssh`.
//!
//! The runner spawns the system `ssh` binary in non-interactive mode (no
//! host-key persistence or checking, one connection attempt, short connect
//! timeout), changes to a working directory on the remote side, and pipes a
//! newline-joined command batch into `bash -e -s` over stdin. Output is
//! mirrored to the local console as it streams and captured for the caller.
//!
//! Exit code 255 is ssh's "could not establish the session" convention.
//! That case is retried with a fixed delay, without bound: a VM whose sshd
//! has not come up yet looks exactly like this. Callers that need a ceiling
//! wrap the whole call in their own deadline. Every other non-zero exit is
//! fatal on the first attempt.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{info, warn};

/// Exit code ssh uses for connection-level failures.
pub const TRANSIENT_EXIT_CODE: i32 = 255;

/// Delay between retries after a transient connection failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Remote execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The remote command ran and exited non-zero (other than the
    /// transient sentinel, which is retried internally).
    #[error("remote command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The hard timeout elapsed and the session was killed.
    #[error("remote session killed after {0:?}")]
    Timeout(Duration),

    /// The ssh binary could not be spawned.
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[source] std::io::Error),

    /// IO failure on the session's streams.
    #[error("ssh session io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One batch of commands to run on a remote host.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// Remote login user.
    pub user: String,

    /// Remote hostname or IP.
    pub host: String,

    /// Private key used as the ssh identity.
    pub key_path: PathBuf,

    /// Directory to `cd` into before running the batch.
    pub working_dir: String,

    /// Shell command lines, executed as one `bash -e` script.
    pub commands: Vec<String>,

    /// Hard kill timeout for the whole session, if any.
    pub timeout: Option<Duration>,
}

/// Captured output of a completed session.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runner for remote command batches.
#[derive(Debug, Clone)]
pub struct SshRunner {
    ssh_path: PathBuf,
    retry_delay: Duration,
}

impl Default for SshRunner {
    fn default() -> Self {
        Self {
            ssh_path: PathBuf::from("/usr/bin/ssh"),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SshRunner {
    /// Runner using an alternate ssh binary (tests use stub scripts).
    pub fn with_ssh_path(ssh_path: impl Into<PathBuf>) -> Self {
        Self {
            ssh_path: ssh_path.into(),
            ..Self::default()
        }
    }

    /// Override the delay between transient-failure retries.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run the batch, retrying transient connection failures until the
    /// session is established or a fatal exit code comes back.
    pub async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ExecError> {
        info!(
            user = %command.user,
            host = %command.host,
            working_dir = %command.working_dir,
            commands = %command.commands.join("; "),
            "running remote commands"
        );

        loop {
            let output = self.attempt(command).await?;
            match output.code {
                0 => return Ok(output),
                TRANSIENT_EXIT_CODE => {
                    warn!(
                        stderr = %output.stderr.trim(),
                        delay_secs = self.retry_delay.as_secs(),
                        "connection not yet accepted, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                code => {
                    return Err(ExecError::CommandFailed {
                        code,
                        stderr: output.stderr,
                    })
                }
            }
        }
    }

    /// One ssh invocation: spawn, feed the script over stdin, stream output.
    async fn attempt(&self, command: &RemoteCommand) -> Result<CommandOutput, ExecError> {
        let mut child = Command::new(&self.ssh_path)
            .args(ssh_args(command))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;

        let mut stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");

        let stdout_task = tokio::spawn(mirror(stdout, io::stdout()));
        let stderr_task = tokio::spawn(mirror(stderr, io::stderr()));

        let script = command.commands.join("\n");
        // A child that exits without reading stdin (connection refused does
        // this) leaves a dead pipe. That is not a session failure in itself;
        // the exit code below decides the outcome.
        match stdin.write_all(script.as_bytes()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(ExecError::Io(e)),
        }
        // Close the stream so the remote shell sees EOF.
        drop(stdin);

        let status = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "killing remote session");
                    let _ = child.kill().await;
                    return Err(ExecError::Timeout(limit));
                }
            },
            None => child.wait().await?,
        };

        let stdout = stdout_task
            .await
            .map_err(|e| ExecError::Io(std::io::Error::other(e)))??;
        let stderr = stderr_task
            .await
            .map_err(|e| ExecError::Io(std::io::Error::other(e)))??;

        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Strict non-interactive ssh arguments for one batch.
fn ssh_args(command: &RemoteCommand) -> Vec<String> {
    vec![
        "-o".to_string(),
        "ConnectTimeout=5".to_string(),
        "-o".to_string(),
        "ConnectionAttempts=1".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("IdentityFile={}", command.key_path.display()),
        format!("{}@{}", command.user, command.host),
        format!("cd {}; bash -e -s", command.working_dir),
    ]
}

/// Copy `reader` to `sink` as bytes arrive, capturing everything read.
async fn mirror<R, W>(mut reader: R, mut sink: W) -> io::Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        sink.flush().await?;
        captured.extend_from_slice(&buf[..n]);
    }

    Ok(String::from_utf8_lossy(&captured).into_owned())
}
