//! Main axum router and HTTP request handlers for the deployment agent.
//!
//! Routes:
//! - `GET  /repos/{project}/{repo}/git/branches`       - list branches
//! - `POST /repos/{project}/{repo}/git/branches`       - create a branch
//! - `POST /repos/{project}/{repo}/git/checkout`       - checkout a branch
//! - `GET  /repos/{project}/{repo}/git/current-branch` - current branch
//! - `POST /repos/{project}/{repo}/git/run-commands`   - advisory-vetted sequence
//! - `POST /repos/{project}/{repo}/deploy`             - archive upload + dist deploy
//! - `GET  /healthz`                                   - health check
//! - `GET  /metrics`                                   - Prometheus metrics
//!
//! Every engine failure is logged here with its full context and surfaced as
//! a structured JSON body; nothing is fatal to the process and requests stay
//! isolated from each other.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::advisory;
use crate::config::RepoConfig;
use crate::engine::{DeployOptions, EngineError, RemoteTarget, RepoEngine};
use crate::metrics::OperationLabels;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    let repos = Router::new()
        .route(
            "/repos/{project}/{repo}/git/branches",
            get(handle_list_branches).post(handle_create_branch),
        )
        .route(
            "/repos/{project}/{repo}/git/checkout",
            post(handle_checkout),
        )
        .route(
            "/repos/{project}/{repo}/git/current-branch",
            get(handle_current_branch),
        )
        .route(
            "/repos/{project}/{repo}/git/run-commands",
            post(handle_run_commands),
        )
        .route("/repos/{project}/{repo}/deploy", post(handle_deploy))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_token,
        ))
        .layer(DefaultBodyLimit::max(max_upload));

    Router::new()
        .merge(repos)
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller authentication
// ---------------------------------------------------------------------------

/// Bearer-token gate for the repository routes.  A no-op when no API token
/// is configured.
async fn require_api_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.api_token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return Err(AppError::Unauthorized(
                "missing or invalid API token".into(),
            ));
        }
    }
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BranchRequest {
    branch_name: String,
}

#[derive(Debug, Deserialize)]
struct RunCommandsRequest {
    commands: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeployQuery {
    /// Declared archive file name; its extension selects the format.
    filename: String,
    branch: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct BranchesResponse {
    branches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BranchResponse {
    message: &'static str,
    branch: String,
}

#[derive(Debug, Serialize)]
struct CurrentBranchResponse {
    current_branch: String,
}

#[derive(Debug, Serialize)]
struct OutputResponse {
    output: String,
}

#[derive(Debug, Serialize)]
struct DeployResponse {
    message: &'static str,
    policy: &'static str,
    files_transferred: usize,
    /// Combined output of the remote deployment sequence (empty for pure
    /// transfer deployments).
    output: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /repos/{project}/{repo}/git/branches`
#[instrument(skip(state), fields(%project, %repo))]
async fn handle_list_branches(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (engine, _) = resolve_engine(&state, &project, &repo)?;
    let branches = observed(&state, "branches", engine.list_branches()).await?;
    Ok(Json(BranchesResponse { branches }).into_response())
}

/// `POST /repos/{project}/{repo}/git/branches`
#[instrument(skip(state, body), fields(%project, %repo))]
async fn handle_create_branch(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
    Json(body): Json<BranchRequest>,
) -> Result<Response, AppError> {
    let (engine, _) = resolve_engine(&state, &project, &repo)?;
    let branch = observed(&state, "create-branch", engine.create_branch(&body.branch_name)).await?;
    Ok(Json(BranchResponse {
        message: "branch created",
        branch,
    })
    .into_response())
}

/// `POST /repos/{project}/{repo}/git/checkout`
#[instrument(skip(state, body), fields(%project, %repo))]
async fn handle_checkout(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
    Json(body): Json<BranchRequest>,
) -> Result<Response, AppError> {
    let (engine, _) = resolve_engine(&state, &project, &repo)?;
    let branch = observed(&state, "checkout", engine.checkout_branch(&body.branch_name)).await?;
    Ok(Json(BranchResponse {
        message: "branch checked out",
        branch,
    })
    .into_response())
}

/// `GET /repos/{project}/{repo}/git/current-branch`
#[instrument(skip(state), fields(%project, %repo))]
async fn handle_current_branch(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (engine, _) = resolve_engine(&state, &project, &repo)?;
    let current_branch = observed(&state, "current-branch", engine.current_branch()).await?;
    Ok(Json(CurrentBranchResponse { current_branch }).into_response())
}

/// `POST /repos/{project}/{repo}/git/run-commands`
///
/// Every command is vetted by the advisory service before anything executes;
/// the first risky verdict — or an unreachable advisory — aborts the whole
/// request.
#[instrument(skip(state, body), fields(%project, %repo))]
async fn handle_run_commands(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
    Json(body): Json<RunCommandsRequest>,
) -> Result<Response, AppError> {
    if body.commands.is_empty() {
        return Err(AppError::Engine(EngineError::InvalidArgument(
            "at least one command is required".into(),
        )));
    }

    let Some(advisor) = state.advisor.as_deref() else {
        state.metrics.metrics.advisory_rejections_total.inc();
        return Err(AppError::Rejected(
            "command advisory is not configured; refusing to run arbitrary commands".into(),
        ));
    };
    if let Some(rejection) = advisory::vet_commands(advisor, &body.commands).await {
        state.metrics.metrics.advisory_rejections_total.inc();
        warn!(command = %rejection.command, reason = %rejection.reason, "run-commands rejected");
        return Err(AppError::Rejected(rejection.reason));
    }

    let (engine, _) = resolve_engine(&state, &project, &repo)?;
    let output = observed(&state, "run-commands", engine.run_commands(&body.commands)).await?;
    Ok(Json(OutputResponse { output }).into_response())
}

/// `POST /repos/{project}/{repo}/deploy?filename=dist.zip[&branch=..][&message=..]`
///
/// The request body is the raw archive; the repository's configured policy
/// decides how the extracted payload lands in the dist directory.
#[instrument(skip(state, query, body), fields(%project, %repo, bytes = body.len()))]
async fn handle_deploy(
    State(state): State<Arc<AppState>>,
    Path((project, repo)): Path<(String, String)>,
    Query(query): Query<DeployQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    if body.is_empty() {
        return Err(AppError::Engine(EngineError::InvalidArgument(
            "archive body must not be empty".into(),
        )));
    }

    let (engine, repo_config) = resolve_engine(&state, &project, &repo)?;
    let options = DeployOptions {
        policy: repo_config.deploy_policy,
        dist_dir: repo_config.dist_dir.clone(),
        branch: query.branch,
        commit_message: query.message,
    };

    state.metrics.metrics.deploy_upload_bytes.inc_by(body.len() as u64);

    let outcome = observed(
        &state,
        "deploy",
        engine.deploy_archive(&body, &query.filename, &options),
    )
    .await?;

    state
        .metrics
        .metrics
        .deploys_total
        .get_or_create(&crate::metrics::PolicyLabels {
            policy: outcome.policy.as_str().to_string(),
        })
        .inc();

    info!(
        policy = outcome.policy.as_str(),
        files = outcome.files_transferred,
        "deployment finished"
    );

    Ok(Json(DeployResponse {
        message: "dist deployed",
        policy: outcome.policy.as_str(),
        files_transferred: outcome.files_transferred,
        output: outcome.output,
    })
    .into_response())
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let response = crate::health::check(state.config.advisory.as_ref(), &state.http_client).await;
    let status = match response.status {
        crate::health::HealthStatus::Ok | crate::health::HealthStatus::Degraded => StatusCode::OK,
        crate::health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(response)).into_response()
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the agent.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mut buf = String::new();
    prometheus_client::encoding::text::encode(&mut buf, &state.metrics.registry)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Look up the repository in the configuration and bind a fresh engine
/// instance to it.  Each request gets its own instance and therefore its own
/// lazily opened sessions.
fn resolve_engine<'a>(
    state: &'a AppState,
    project: &str,
    repo: &str,
) -> Result<(RepoEngine, &'a RepoConfig), AppError> {
    let project_config = state
        .config
        .projects
        .get(project)
        .ok_or_else(|| AppError::NotFound(format!("project {project:?}")))?;
    let repo_config = project_config
        .repositories
        .get(repo)
        .ok_or_else(|| AppError::NotFound(format!("repository {project}/{repo}")))?;

    let password = std::env::var(&project_config.password_env).map_err(|_| {
        error!(
            env = %project_config.password_env,
            "SSH password environment variable is not set"
        );
        AppError::Internal(anyhow::anyhow!(
            "credentials for project {project:?} are not available"
        ))
    })?;

    let target = RemoteTarget {
        host: project_config.host.clone(),
        port: project_config.port,
        username: project_config.username.clone(),
        password,
        working_directory: repo_config.path.clone(),
        sudo: project_config.sudo,
    };

    Ok((RepoEngine::connect(target), repo_config))
}

/// Await an engine operation while recording its outcome and duration.
async fn observed<T>(
    state: &AppState,
    operation: &str,
    fut: impl std::future::Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = fut.await;
    state
        .metrics
        .metrics
        .operations_total
        .get_or_create(&OperationLabels {
            operation: operation.to_string(),
            outcome: if result.is_ok() { "ok" } else { "error" }.to_string(),
        })
        .inc();
    state
        .metrics
        .metrics
        .operation_duration_seconds
        .observe(started.elapsed().as_secs_f64());
    result
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The caller is not authenticated.
    Unauthorized(String),
    /// Unknown project or repository.
    NotFound(String),
    /// The advisory service refused the command sequence.
    Rejected(String),
    /// An engine operation failed.
    Engine(EngineError),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    /// HTTP status for this failure: client errors for bad input and
    /// security rejections, server errors for remote/transport and host
    /// environment failures.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejected(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(err) => match err {
                EngineError::InvalidArgument(_) | EngineError::UnsupportedFormat(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::EmptyArchive { .. } | EngineError::NoPayloadFound { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::Connection { .. }
                | EngineError::CommandExecution { .. }
                | EngineError::Transfer { .. } => StatusCode::BAD_GATEWAY,
                EngineError::ToolUnavailable { .. }
                | EngineError::ExtractionCommand { .. }
                | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Unauthorized(msg) | AppError::NotFound(msg) | AppError::Rejected(msg) => {
                msg.clone()
            }
            AppError::Engine(err) => {
                if status.is_server_error() {
                    error!(error = %err, "engine operation failed");
                } else {
                    warn!(error = %err, "request rejected");
                }
                err.to_string()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                format!("internal server error: {err:#}")
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
