use serde::Serialize;

use crate::config::AdvisoryConfig;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub advisory: CheckResult,
    pub scratch: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn healthy_with(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// Reachability of the command advisory.  Any HTTP response counts — the
/// check is about the network path, not the verdict endpoint.
async fn check_advisory(
    advisory: Option<&AdvisoryConfig>,
    client: &reqwest::Client,
) -> CheckResult {
    let Some(advisory) = advisory else {
        return CheckResult::healthy_with("not configured");
    };
    match client.get(&advisory.base_url).send().await {
        Ok(_) => CheckResult::healthy(),
        Err(err) => CheckResult::unhealthy(format!("advisory unreachable: {err}")),
    }
}

/// Scratch space for archive extraction must be writable.
fn check_scratch() -> CheckResult {
    match tempfile::tempdir() {
        Ok(_) => CheckResult::healthy(),
        Err(err) => CheckResult::unhealthy(format!("cannot create scratch directory: {err}")),
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Run every health check and aggregate the overall status.  A missing
/// scratch directory makes the agent unhealthy (no deployment can work); a
/// down advisory only degrades it (git operations still function).
pub async fn check(
    advisory: Option<&AdvisoryConfig>,
    client: &reqwest::Client,
) -> HealthResponse {
    let advisory = check_advisory(advisory, client).await;
    let scratch = check_scratch();

    let status = if !scratch.ok {
        HealthStatus::Unhealthy
    } else if !advisory.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    HealthResponse {
        status,
        checks: HealthChecks { advisory, scratch },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
