//! Typed failure taxonomy for the remote-operations engine.
//!
//! Every engine operation returns [`EngineError`] so that the HTTP boundary
//! can map failures onto status categories without string-matching.  The
//! variants deliberately carry enough context to diagnose a failure from the
//! logs alone (command text, exit status, file paths) — but never the SSH
//! password.

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum EngineError {
    /// The SSH session could not be established or died mid-operation.
    /// Carries host and username for diagnostics; the password is never
    /// captured anywhere in the error chain.
    Connection {
        host: String,
        username: String,
        source: anyhow::Error,
    },
    /// A remote command exited with a non-zero status.  `command` is the full
    /// joined invocation (including the working-directory prefix), `output`
    /// the combined stdout+stderr captured before exit.
    CommandExecution {
        command: String,
        output: String,
        exit_status: i32,
    },
    /// A caller-supplied argument was empty or malformed.
    InvalidArgument(String),
    /// The declared archive extension matches no supported format.
    UnsupportedFormat(String),
    /// An external decompression tool is not installed on this host.
    ToolUnavailable { tool: String, hint: String },
    /// An external decompression tool ran but exited non-zero.
    ExtractionCommand { exit_status: i32, output: String },
    /// Extraction succeeded but produced no entries.
    EmptyArchive { archive: String },
    /// No regular file was found within the depth bound of the extraction
    /// root.  The bound guards against pathological archive structures.
    NoPayloadFound { root: PathBuf, max_depth: usize },
    /// A file transfer over the SFTP session failed.  The partially uploaded
    /// remote tree is left as-is.
    Transfer {
        local_file: PathBuf,
        remote_file: String,
        source: anyhow::Error,
    },
    /// A local failure outside the taxonomy above (scratch-directory I/O,
    /// in-process archive decoding, task joining).
    Internal(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Connection {
                host,
                username,
                source,
            } => write!(
                f,
                "SSH connection failed for {username}@{host}: {source:#}"
            ),
            EngineError::CommandExecution {
                command,
                output,
                exit_status,
            } => write!(
                f,
                "remote command failed (status {exit_status}): {command}\noutput: {}",
                output.trim()
            ),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::UnsupportedFormat(ext) => {
                write!(f, "unsupported archive format: {ext:?}")
            }
            EngineError::ToolUnavailable { tool, hint } => {
                write!(f, "required tool {tool:?} is not installed ({hint})")
            }
            EngineError::ExtractionCommand {
                exit_status,
                output,
            } => write!(
                f,
                "extraction command failed (status {exit_status}): {}",
                output.trim()
            ),
            EngineError::EmptyArchive { archive } => {
                write!(f, "archive {archive:?} produced no files")
            }
            EngineError::NoPayloadFound { root, max_depth } => write!(
                f,
                "no deployable files found under {} within {max_depth} directory levels",
                root.display()
            ),
            EngineError::Transfer {
                local_file,
                remote_file,
                source,
            } => write!(
                f,
                "transfer failed: {} -> {remote_file}: {source:#}",
                local_file.display()
            ),
            EngineError::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Connection { source, .. }
            | EngineError::Transfer { source, .. }
            | EngineError::Internal(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_never_mentions_password() {
        let err = EngineError::Connection {
            host: "10.0.0.5".into(),
            username: "deploy".into(),
            source: anyhow::anyhow!("authentication failed"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("deploy@10.0.0.5"));
        assert!(rendered.contains("authentication failed"));
    }

    #[test]
    fn command_failure_renders_command_status_and_output() {
        let err = EngineError::CommandExecution {
            command: "cd '/srv/web' && git pull".into(),
            output: "fatal: not a git repository\n".into(),
            exit_status: 128,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("status 128"));
        assert!(rendered.contains("git pull"));
        assert!(rendered.contains("not a git repository"));
    }
}
