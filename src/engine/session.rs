//! SSH session management for one remote repository target.
//!
//! [`SshClient`] owns two lazily established channels to the same host: an
//! exec session for shell commands and an independent SFTP session for file
//! transfer.  Both are created on first use and reused for the lifetime of
//! the owning engine instance; nothing is pooled or shared across instances.
//! All libssh2 calls are blocking, so they run inside
//! `tokio::task::spawn_blocking`.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context as _};
use tracing::debug;

use super::error::EngineError;

// ---------------------------------------------------------------------------
// Target and result types
// ---------------------------------------------------------------------------

/// Where commands run: one host, one login, one fixed working directory.
/// Immutable for the lifetime of an engine instance and never persisted.
#[derive(Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote path every command sequence is rooted in.
    pub working_directory: String,
    /// Prefix git invocations with `sudo` (some deploy hosts check out the
    /// tree under a service account).
    pub sudo: bool,
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("working_directory", &self.working_directory)
            .field("sudo", &self.sudo)
            .finish()
    }
}

/// Outcome of one remote invocation: combined stdout+stderr plus the exit
/// status reported by the remote shell.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub combined_output: String,
    pub exit_status: i32,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Command channel to the remote host.  The engine and its tests dispatch
/// through this trait so that command composition can be exercised against a
/// scripted session.
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    /// Execute a single shell invocation and capture its result.  Transport
    /// failures surface as [`EngineError::Connection`]; a non-zero exit is
    /// NOT an error at this layer (the runner decides that).
    async fn exec(&self, command: &str) -> Result<CommandResult, EngineError>;
}

/// File-transfer channel to the remote host, independent of the command
/// channel.
#[async_trait::async_trait]
pub trait RemoteTransfer: Send + Sync {
    /// Create a remote directory, including missing parents.  Idempotent.
    async fn make_dir(&self, remote: &str) -> Result<(), EngineError>;

    /// Copy one local file to `remote`, truncating any existing file.
    async fn send_file(&self, local: &Path, remote: &str) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// SSH implementation
// ---------------------------------------------------------------------------

/// Real SSH client for one [`RemoteTarget`].  Implements both seams.
pub struct SshClient {
    target: RemoteTarget,
    exec_session: Arc<Mutex<Option<ssh2::Session>>>,
    sftp_session: Arc<Mutex<Option<ssh2::Sftp>>>,
}

impl SshClient {
    /// Bind a client to a target.  No network I/O happens here; sessions are
    /// opened on first use.
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            exec_session: Arc::new(Mutex::new(None)),
            sftp_session: Arc::new(Mutex::new(None)),
        }
    }
}

/// Open and authenticate a fresh session against `target`.
fn open_session(target: &RemoteTarget) -> Result<ssh2::Session, EngineError> {
    let connect = || -> anyhow::Result<ssh2::Session> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .with_context(|| format!("tcp connect to {}:{}", target.host, target.port))?;
        let mut session = ssh2::Session::new().context("libssh2 session init")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("ssh handshake")?;
        session
            .userauth_password(&target.username, &target.password)
            .context("password authentication")?;
        if !session.authenticated() {
            return Err(anyhow!("password authentication rejected"));
        }
        Ok(session)
    };

    connect().map_err(|source| EngineError::Connection {
        host: target.host.clone(),
        username: target.username.clone(),
        source,
    })
}

/// Run one command over the (lazily created) exec session and capture the
/// combined output and exit status.
fn exec_blocking(
    target: &RemoteTarget,
    slot: &Mutex<Option<ssh2::Session>>,
    command: &str,
) -> Result<CommandResult, EngineError> {
    let mut guard = slot
        .lock()
        .map_err(|_| EngineError::Internal(anyhow!("exec session lock poisoned")))?;

    if guard.is_none() {
        debug!(host = %target.host, "opening exec session");
        *guard = Some(open_session(target)?);
    }
    let session = guard
        .as_ref()
        .ok_or_else(|| EngineError::Internal(anyhow!("exec session slot empty after init")))?;

    let run = || -> anyhow::Result<CommandResult> {
        let mut channel = session.channel_session().context("open channel")?;
        channel.exec(command).context("exec request")?;

        let mut combined_output = String::new();
        channel
            .read_to_string(&mut combined_output)
            .context("read stdout")?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .context("read stderr")?;
        combined_output.push_str(&stderr);

        channel.wait_close().context("close channel")?;
        let exit_status = channel.exit_status().context("exit status")?;

        Ok(CommandResult {
            combined_output,
            exit_status,
        })
    };

    run().map_err(|source| EngineError::Connection {
        host: target.host.clone(),
        username: target.username.clone(),
        source,
    })
}

/// Get or open the SFTP session, then run `op` against it.
fn with_sftp_blocking<T>(
    target: &RemoteTarget,
    slot: &Mutex<Option<ssh2::Sftp>>,
    op: impl FnOnce(&ssh2::Sftp) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut guard = slot
        .lock()
        .map_err(|_| EngineError::Internal(anyhow!("sftp session lock poisoned")))?;

    if guard.is_none() {
        debug!(host = %target.host, "opening sftp session");
        let session = open_session(target)?;
        let sftp = session.sftp().map_err(|e| EngineError::Connection {
            host: target.host.clone(),
            username: target.username.clone(),
            source: anyhow!(e).context("open sftp subsystem"),
        })?;
        *guard = Some(sftp);
    }
    let sftp = guard
        .as_ref()
        .ok_or_else(|| EngineError::Internal(anyhow!("sftp session slot empty after init")))?;

    op(sftp)
}

/// Create `remote` and any missing parents over SFTP.  Existing directories
/// are accepted silently.
fn mkdir_recursive(sftp: &ssh2::Sftp, remote: &str) -> anyhow::Result<()> {
    let mut current = String::new();
    for component in remote.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        let path = Path::new(&current);
        match sftp.stat(path) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => return Err(anyhow!("remote path {current} exists and is not a directory")),
            Err(_) => {
                sftp.mkdir(path, 0o755)
                    .with_context(|| format!("mkdir {current}"))?;
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl RemoteShell for SshClient {
    async fn exec(&self, command: &str) -> Result<CommandResult, EngineError> {
        let target = self.target.clone();
        let slot = Arc::clone(&self.exec_session);
        let command = command.to_owned();
        tokio::task::spawn_blocking(move || exec_blocking(&target, &slot, &command))
            .await
            .map_err(|e| EngineError::Internal(anyhow!("ssh exec task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl RemoteTransfer for SshClient {
    async fn make_dir(&self, remote: &str) -> Result<(), EngineError> {
        let target = self.target.clone();
        let slot = Arc::clone(&self.sftp_session);
        let remote = remote.to_owned();
        tokio::task::spawn_blocking(move || {
            with_sftp_blocking(&target, &slot, |sftp| {
                mkdir_recursive(sftp, &remote).map_err(|source| EngineError::Transfer {
                    local_file: PathBuf::new(),
                    remote_file: remote.clone(),
                    source,
                })
            })
        })
        .await
        .map_err(|e| EngineError::Internal(anyhow!("sftp mkdir task failed: {e}")))?
    }

    async fn send_file(&self, local: &Path, remote: &str) -> Result<(), EngineError> {
        let target = self.target.clone();
        let slot = Arc::clone(&self.sftp_session);
        let local = local.to_path_buf();
        let remote = remote.to_owned();
        tokio::task::spawn_blocking(move || {
            with_sftp_blocking(&target, &slot, |sftp| {
                let copy = || -> anyhow::Result<()> {
                    let mut source = std::fs::File::open(&local)
                        .with_context(|| format!("open {}", local.display()))?;
                    let mut dest = sftp
                        .create(Path::new(&remote))
                        .with_context(|| format!("create remote file {remote}"))?;
                    std::io::copy(&mut source, &mut dest).context("copy file contents")?;
                    Ok(())
                };
                copy().map_err(|source| EngineError::Transfer {
                    local_file: local.clone(),
                    remote_file: remote.clone(),
                    source,
                })
            })
        })
        .await
        .map_err(|e| EngineError::Internal(anyhow!("sftp upload task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_password() {
        let target = RemoteTarget {
            host: "10.0.0.5".into(),
            port: 22,
            username: "deploy".into(),
            password: "hunter2".into(),
            working_directory: "/srv/web".into(),
            sudo: false,
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
