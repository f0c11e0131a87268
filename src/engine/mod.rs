//! Remote repository operations engine.
//!
//! One [`RepoEngine`] instance is bound to one [`RemoteTarget`] for the
//! duration of a single logical operation.  Sessions are established lazily
//! and reused for the instance's lifetime; separate requests get separate
//! instances and can run in parallel without shared state.  There is no
//! cancellation primitive — once a remote sequence starts it runs to
//! completion or failure on the remote side — and no retries at this layer.

pub mod archive;
pub mod branches;
pub mod deploy;
pub mod error;
pub mod payload;
pub mod runner;
pub mod session;
pub mod upload;

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, instrument};

pub use deploy::DeployPolicy;
pub use error::EngineError;
pub use session::{CommandResult, RemoteTarget};

use payload::MAX_PAYLOAD_DEPTH;
use runner::sh_quote;
use session::{RemoteShell, RemoteTransfer, SshClient};

/// Remote staging directory for command-based deployments, relative to the
/// working directory.  Created fresh for every deploy and removed by the
/// deployment sequence itself.
const STAGE_DIR: &str = ".repodrive-stage";

// ---------------------------------------------------------------------------
// Deploy parameters
// ---------------------------------------------------------------------------

/// Caller-supplied parameters for a dist deployment.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub policy: DeployPolicy,
    /// Dist directory name, relative to the working directory.
    pub dist_dir: String,
    /// Required for [`DeployPolicy::CommitAndPush`], ignored otherwise.
    pub branch: Option<String>,
    /// Required for [`DeployPolicy::CommitAndPush`], ignored otherwise.
    pub commit_message: Option<String>,
}

/// What a completed deployment did.
#[derive(Debug)]
pub struct DeployOutcome {
    pub policy: DeployPolicy,
    pub files_transferred: usize,
    /// Combined output of the remote command sequence (empty for pure
    /// transfer deployments).
    pub output: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Engine instance bound to one remote repository.
pub struct RepoEngine {
    target: RemoteTarget,
    shell: Arc<dyn RemoteShell>,
    transfer: Arc<dyn RemoteTransfer>,
}

impl RepoEngine {
    /// Bind an engine to `target`.  No connection is opened until the first
    /// remote operation runs.
    pub fn connect(target: RemoteTarget) -> Self {
        let client = Arc::new(SshClient::new(target.clone()));
        Self {
            target,
            shell: Arc::clone(&client) as Arc<dyn RemoteShell>,
            transfer: client,
        }
    }

    #[cfg(test)]
    fn with_channels(
        target: RemoteTarget,
        shell: Arc<dyn RemoteShell>,
        transfer: Arc<dyn RemoteTransfer>,
    ) -> Self {
        Self {
            target,
            shell,
            transfer,
        }
    }

    fn git(&self, args: &str) -> String {
        if self.target.sudo {
            format!("sudo git {args}")
        } else {
            format!("git {args}")
        }
    }

    fn workdir(&self) -> &str {
        &self.target.working_directory
    }

    // -- branch operations --------------------------------------------------

    /// Fetch, then list local branches in remote order.
    #[instrument(skip(self), fields(host = %self.target.host))]
    pub async fn list_branches(&self) -> Result<Vec<String>, EngineError> {
        runner::run(self.shell.as_ref(), self.workdir(), &self.git("fetch")).await?;
        let result = runner::run(self.shell.as_ref(), self.workdir(), &self.git("branch -l")).await?;
        Ok(branches::parse_branches(&result.combined_output))
    }

    /// Discard local changes and switch to `branch`, then report the branch
    /// that is actually checked out.
    #[instrument(skip(self), fields(host = %self.target.host, %branch))]
    pub async fn checkout_branch(&self, branch: &str) -> Result<String, EngineError> {
        let branch = non_empty(branch, "branch name")?;
        let sequence = vec![
            self.git("fetch"),
            self.git("reset --hard"),
            self.git(&format!("checkout {}", sh_quote(branch))),
            self.git("pull"),
        ];
        runner::run_sequence(self.shell.as_ref(), self.workdir(), &sequence).await?;
        self.current_branch().await
    }

    /// Create a new branch off the current head and report the resulting
    /// branch name.
    #[instrument(skip(self), fields(host = %self.target.host, %branch))]
    pub async fn create_branch(&self, branch: &str) -> Result<String, EngineError> {
        let branch = non_empty(branch, "branch name")?;
        runner::run(
            self.shell.as_ref(),
            self.workdir(),
            &self.git(&format!("checkout -b {}", sh_quote(branch))),
        )
        .await?;
        self.current_branch().await
    }

    /// Name of the currently checked-out branch.
    #[instrument(skip(self), fields(host = %self.target.host))]
    pub async fn current_branch(&self) -> Result<String, EngineError> {
        let result = runner::run(
            self.shell.as_ref(),
            self.workdir(),
            &self.git("branch --show-current"),
        )
        .await?;
        Ok(result.combined_output.trim().to_string())
    }

    // -- arbitrary sequences ------------------------------------------------

    /// Run a caller-supplied command sequence inside the working directory.
    /// The shell's `&&` semantics stop at the first failing sub-command;
    /// earlier sub-commands are not rolled back.
    #[instrument(skip(self, commands), fields(host = %self.target.host, count = commands.len()))]
    pub async fn run_commands(&self, commands: &[String]) -> Result<String, EngineError> {
        runner::run_sequence(self.shell.as_ref(), self.workdir(), commands).await
    }

    // -- deployment ---------------------------------------------------------

    /// Extract an uploaded archive, locate its payload, and deploy it into
    /// the repository's dist directory according to `options.policy`.
    ///
    /// The local scratch directory is removed on every exit path, success or
    /// failure.
    #[instrument(
        skip(self, archive_bytes, options),
        fields(host = %self.target.host, %declared_name, policy = options.policy.as_str())
    )]
    pub async fn deploy_archive(
        &self,
        archive_bytes: &[u8],
        declared_name: &str,
        options: &DeployOptions,
    ) -> Result<DeployOutcome, EngineError> {
        let scratch = tempfile::tempdir()
            .context("create scratch directory")
            .map_err(EngineError::Internal)?;
        let archive_path = scratch.path().join("upload.archive");
        std::fs::write(&archive_path, archive_bytes)
            .context("write uploaded archive to scratch")
            .map_err(EngineError::Internal)?;

        let extracted = scratch.path().join("extracted");
        archive::extract(&archive_path, &extracted, declared_name).await?;
        let payload_root = payload::resolve_payload_root(&extracted, MAX_PAYLOAD_DEPTH)?;
        info!(payload = %payload_root.display(), "payload resolved");

        let outcome = match options.policy {
            DeployPolicy::Transfer => {
                let dist = remote_join(self.workdir(), &options.dist_dir);
                // Clear the old artifacts; the uploader recreates the tree.
                runner::run(
                    self.shell.as_ref(),
                    self.workdir(),
                    &format!("rm -rf {}", sh_quote(&options.dist_dir)),
                )
                .await?;
                let files_transferred =
                    upload::upload_tree(self.transfer.as_ref(), &payload_root, &dist).await?;
                DeployOutcome {
                    policy: options.policy,
                    files_transferred,
                    output: String::new(),
                }
            }
            DeployPolicy::CopyOnly => {
                let stage = self.stage_payload(&payload_root).await?;
                let sequence = deploy::copy_only_sequence(&stage.remote_dir, &options.dist_dir);
                let output =
                    runner::run_sequence(self.shell.as_ref(), self.workdir(), &sequence).await?;
                DeployOutcome {
                    policy: options.policy,
                    files_transferred: stage.files_transferred,
                    output,
                }
            }
            DeployPolicy::CommitAndPush => {
                let branch = options
                    .branch
                    .as_deref()
                    .map(|b| non_empty(b, "branch name"))
                    .transpose()?
                    .ok_or_else(|| {
                        EngineError::InvalidArgument(
                            "branch is required for commit-and-push deployments".into(),
                        )
                    })?;
                let message = options
                    .commit_message
                    .as_deref()
                    .map(|m| non_empty(m, "commit message"))
                    .transpose()?
                    .ok_or_else(|| {
                        EngineError::InvalidArgument(
                            "commit message is required for commit-and-push deployments".into(),
                        )
                    })?;

                let stage = self.stage_payload(&payload_root).await?;
                let sequence = deploy::commit_and_push_sequence(
                    branch,
                    &stage.remote_dir,
                    message,
                    &options.dist_dir,
                    self.target.sudo,
                );
                let output =
                    runner::run_sequence(self.shell.as_ref(), self.workdir(), &sequence).await?;
                DeployOutcome {
                    policy: options.policy,
                    files_transferred: stage.files_transferred,
                    output,
                }
            }
        };

        info!(
            files = outcome.files_transferred,
            "deployment complete"
        );
        Ok(outcome)
    }

    /// Upload the payload to a fresh staging directory under the working
    /// directory, for the command-based deployment policies.
    async fn stage_payload(&self, payload_root: &std::path::Path) -> Result<Stage, EngineError> {
        let remote_dir = remote_join(self.workdir(), STAGE_DIR);
        runner::run(
            self.shell.as_ref(),
            self.workdir(),
            &format!("rm -rf {}", sh_quote(&remote_dir)),
        )
        .await?;
        let files_transferred =
            upload::upload_tree(self.transfer.as_ref(), payload_root, &remote_dir).await?;
        Ok(Stage {
            remote_dir,
            files_transferred,
        })
    }
}

struct Stage {
    remote_dir: String,
    files_transferred: usize,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidArgument(format!(
            "{what} cannot be empty"
        )));
    }
    Ok(trimmed)
}

fn remote_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::error::EngineError;
    use super::session::{CommandResult, RemoteShell, RemoteTransfer};

    /// Scripted command channel that records every invocation.
    pub struct MockShell {
        scripted: Mutex<VecDeque<CommandResult>>,
        fallback: CommandResult,
        commands: Mutex<Vec<String>>,
    }

    impl MockShell {
        pub fn succeeding(output: &str) -> Self {
            Self {
                scripted: Mutex::new(VecDeque::new()),
                fallback: CommandResult {
                    combined_output: output.to_string(),
                    exit_status: 0,
                },
                commands: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(output: &str, exit_status: i32) -> Self {
            Self {
                scripted: Mutex::new(VecDeque::new()),
                fallback: CommandResult {
                    combined_output: output.to_string(),
                    exit_status,
                },
                commands: Mutex::new(Vec::new()),
            }
        }

        /// Queue per-call results; once exhausted the fallback applies.
        pub fn scripted(results: Vec<CommandResult>) -> Self {
            Self {
                scripted: Mutex::new(results.into()),
                fallback: CommandResult {
                    combined_output: String::new(),
                    exit_status: 0,
                },
                commands: Mutex::new(Vec::new()),
            }
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().expect("mock lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl RemoteShell for MockShell {
        async fn exec(&self, command: &str) -> Result<CommandResult, EngineError> {
            self.commands
                .lock()
                .expect("mock lock")
                .push(command.to_string());
            let next = self.scripted.lock().expect("mock lock").pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    /// One recorded transfer-session operation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TransferCall {
        MakeDir(String),
        SendFile(String),
    }

    /// Transfer channel that records successful operations and optionally
    /// fails on one remote path.
    #[derive(Default)]
    pub struct MockTransfer {
        calls: Mutex<Vec<TransferCall>>,
        fail_on: Option<String>,
    }

    impl MockTransfer {
        pub fn failing_on(remote_path: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(remote_path.to_string()),
            }
        }

        pub fn calls(&self) -> Vec<TransferCall> {
            self.calls.lock().expect("mock lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl RemoteTransfer for MockTransfer {
        async fn make_dir(&self, remote: &str) -> Result<(), EngineError> {
            self.calls
                .lock()
                .expect("mock lock")
                .push(TransferCall::MakeDir(remote.to_string()));
            Ok(())
        }

        async fn send_file(&self, local: &Path, remote: &str) -> Result<(), EngineError> {
            if self.fail_on.as_deref() == Some(remote) {
                return Err(EngineError::Transfer {
                    local_file: local.to_path_buf(),
                    remote_file: remote.to_string(),
                    source: anyhow!("induced transfer failure"),
                });
            }
            self.calls
                .lock()
                .expect("mock lock")
                .push(TransferCall::SendFile(remote.to_string()));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
