//! Remote command execution rooted in the target's working directory.
//!
//! Every invocation is prefixed with a `cd` into the working directory, and
//! multi-command sequences are joined with `&&` so the remote shell stops at
//! the first failing sub-command.  The engine never rolls anything back:
//! whatever the last successful sub-command left on the remote side stays.

use tracing::{debug, instrument};

use super::error::EngineError;
use super::session::{CommandResult, RemoteShell};

// ---------------------------------------------------------------------------
// Shell quoting
// ---------------------------------------------------------------------------

/// Quote `value` for a POSIX shell.  Wraps in single quotes and escapes any
/// embedded single quote, neutralising every other metacharacter.  This is a
/// hard contract on all command composition: raw branch names, commit
/// messages, and paths never reach the remote shell unquoted.
pub fn sh_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run a single command inside `working_directory`, failing on a non-zero
/// exit status.
#[instrument(skip(shell, command), fields(%working_directory))]
pub async fn run(
    shell: &dyn RemoteShell,
    working_directory: &str,
    command: &str,
) -> Result<CommandResult, EngineError> {
    let full_command = format!("cd {} && {}", sh_quote(working_directory), command);
    debug!(command = %full_command, "executing remote command");

    let result = shell.exec(&full_command).await?;
    if result.exit_status != 0 {
        return Err(EngineError::CommandExecution {
            command: full_command,
            output: result.combined_output,
            exit_status: result.exit_status,
        });
    }
    Ok(result)
}

/// Join `commands` with `&&` and run them as one invocation.  Rejects an
/// empty list before touching the remote side.  Returns the combined output
/// of the whole sequence.
pub async fn run_sequence(
    shell: &dyn RemoteShell,
    working_directory: &str,
    commands: &[String],
) -> Result<String, EngineError> {
    if commands.is_empty() {
        return Err(EngineError::InvalidArgument(
            "at least one command is required".into(),
        ));
    }
    let joined = commands.join(" && ");
    let result = run(shell, working_directory, &joined).await?;
    Ok(result.combined_output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockShell;

    #[test]
    fn quoting_wraps_and_escapes() {
        assert_eq!(sh_quote("main"), "'main'");
        assert_eq!(sh_quote("fix; rm -rf /"), "'fix; rm -rf /'");
        assert_eq!(sh_quote("it's"), "'it'\\''s'");
        assert_eq!(sh_quote(""), "''");
    }

    #[tokio::test]
    async fn empty_sequence_is_rejected_without_remote_calls() {
        let shell = MockShell::succeeding("");
        let err = run_sequence(&shell, "/srv/web", &[])
            .await
            .expect_err("empty sequence must fail");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn sequence_is_joined_and_rooted_in_working_directory() {
        let shell = MockShell::succeeding("done");
        let output = run_sequence(
            &shell,
            "/srv/web",
            &["git fetch".to_string(), "git pull".to_string()],
        )
        .await
        .expect("sequence succeeds");

        assert_eq!(output, "done");
        assert_eq!(
            shell.commands(),
            vec!["cd '/srv/web' && git fetch && git pull".to_string()]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_output_and_status() {
        let shell = MockShell::failing("boom", 1);
        let err = run(&shell, "/srv/web", "false")
            .await
            .expect_err("non-zero exit must fail");
        match err {
            EngineError::CommandExecution {
                command,
                output,
                exit_status,
            } => {
                assert!(command.contains("false"));
                assert_eq!(output, "boom");
                assert_eq!(exit_status, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
