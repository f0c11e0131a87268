//! Command-risk advisory client.
//!
//! Before an arbitrary command sequence touches a remote host, each command
//! is submitted to an external advisory service.  A command flagged as risky
//! aborts the whole request with the advisory's stated reason.  The policy
//! is fail-closed: an unreachable or malformed advisory — or no advisory
//! configured at all — also rejects the sequence.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::AdvisoryConfig;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Advisory verdict for one command.
#[derive(Debug, Clone)]
pub struct Advice {
    pub risky: bool,
    pub reason: Option<String>,
}

/// Why a command sequence was refused before any remote execution.
#[derive(Debug)]
pub struct Rejection {
    pub command: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the advisory service so the vetting flow can be
/// exercised against scripted verdicts.
#[async_trait::async_trait]
pub trait CommandAdvisor: Send + Sync {
    /// Assess a single command.  An `Err` means the advisory could not give
    /// a verdict; callers must treat that as unsafe.
    async fn assess(&self, command: &str) -> Result<Advice>;
}

// ---------------------------------------------------------------------------
// Vetting flow
// ---------------------------------------------------------------------------

/// Vet every command in order before anything executes.  Returns the first
/// rejection, or `None` when the whole sequence is cleared.
pub async fn vet_commands(
    advisor: &dyn CommandAdvisor,
    commands: &[String],
) -> Option<Rejection> {
    for command in commands {
        match advisor.assess(command).await {
            Ok(advice) if advice.risky => {
                let reason = advice
                    .reason
                    .unwrap_or_else(|| "flagged as risky by the command advisory".into());
                warn!(%command, %reason, "command rejected by advisory");
                return Some(Rejection {
                    command: command.clone(),
                    reason,
                });
            }
            Ok(_) => {
                debug!(%command, "command cleared by advisory");
            }
            Err(err) => {
                warn!(%command, error = %err, "advisory unavailable; failing closed");
                return Some(Rejection {
                    command: command.clone(),
                    reason: "command advisory is unreachable; refusing to execute".into(),
                });
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GuardRequest<'a> {
    command: &'a str,
}

#[derive(Debug, Deserialize)]
struct GuardResponse {
    data: GuardVerdict,
}

#[derive(Debug, Deserialize)]
struct GuardVerdict {
    #[serde(default)]
    is_risk: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Advisory backed by an HTTP service exposing `POST /git_manager_guard`.
pub struct HttpAdvisor {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpAdvisor {
    /// Build the advisor from configuration, resolving the bearer token from
    /// the configured environment variable.
    pub fn from_config(config: &AdvisoryConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).with_context(|| {
            format!(
                "advisory token environment variable {} is not set",
                config.token_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("build advisory http client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/git_manager_guard",
                config.base_url.trim_end_matches('/')
            ),
            token,
        })
    }
}

#[async_trait::async_trait]
impl CommandAdvisor for HttpAdvisor {
    #[instrument(skip(self, command))]
    async fn assess(&self, command: &str) -> Result<Advice> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&GuardRequest { command })
            .send()
            .await
            .context("reach command advisory")?
            .error_for_status()
            .context("command advisory returned an error status")?;

        let verdict: GuardResponse = response
            .json()
            .await
            .context("decode command advisory response")?;

        Ok(Advice {
            risky: verdict.data.is_risk,
            reason: verdict.data.reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted advisor: each assessment pops the next verdict; records what
    /// was assessed.
    struct ScriptedAdvisor {
        verdicts: Mutex<Vec<Result<Advice>>>,
        assessed: Mutex<Vec<String>>,
    }

    impl ScriptedAdvisor {
        fn new(verdicts: Vec<Result<Advice>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                assessed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CommandAdvisor for ScriptedAdvisor {
        async fn assess(&self, command: &str) -> Result<Advice> {
            self.assessed
                .lock()
                .expect("mock lock")
                .push(command.to_string());
            self.verdicts.lock().expect("mock lock").remove(0)
        }
    }

    fn safe() -> Result<Advice> {
        Ok(Advice {
            risky: false,
            reason: None,
        })
    }

    #[tokio::test]
    async fn risky_command_aborts_with_the_advisory_reason() {
        let advisor = ScriptedAdvisor::new(vec![
            safe(),
            Ok(Advice {
                risky: true,
                reason: Some("destructive command".into()),
            }),
        ]);
        let commands = vec!["git status".to_string(), "rm -rf /".to_string()];

        let rejection = vet_commands(&advisor, &commands)
            .await
            .expect("risky command must be rejected");
        assert_eq!(rejection.command, "rm -rf /");
        assert_eq!(rejection.reason, "destructive command");
    }

    #[tokio::test]
    async fn unreachable_advisory_fails_closed() {
        let advisor = ScriptedAdvisor::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let commands = vec!["git status".to_string()];

        let rejection = vet_commands(&advisor, &commands)
            .await
            .expect("unreachable advisory must reject");
        assert!(rejection.reason.contains("unreachable"));
    }

    #[tokio::test]
    async fn cleared_sequence_passes_every_command_in_order() {
        let advisor = ScriptedAdvisor::new(vec![safe(), safe()]);
        let commands = vec!["git fetch".to_string(), "git pull".to_string()];

        assert!(vet_commands(&advisor, &commands).await.is_none());
        assert_eq!(
            *advisor.assessed.lock().expect("mock lock"),
            vec!["git fetch".to_string(), "git pull".to_string()]
        );
    }
}
