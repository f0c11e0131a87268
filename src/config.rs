use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::DeployPolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Optional command-risk advisory.  Without it, arbitrary command
    /// sequences are refused outright (fail closed).
    #[serde(default)]
    pub advisory: Option<AdvisoryConfig>,
    /// Projects keyed by name; each groups the repositories living on one
    /// host under one login.
    pub projects: HashMap<String, ProjectConfig>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    pub listen: String,
    /// Upper bound on uploaded archive size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Caller auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Name of the environment variable holding the API bearer token.  When
    /// unset, repository routes are open (suitable only behind a trusted
    /// reverse proxy).
    #[serde(default)]
    pub api_token_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Advisory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AdvisoryConfig {
    /// Base URL of the advisory service; commands are POSTed to
    /// `<base_url>/git_manager_guard`.
    pub base_url: String,
    /// Name of the environment variable holding the advisory bearer token.
    #[serde(default = "default_advisory_token_env")]
    pub token_env: String,
    #[serde(default = "default_advisory_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_advisory_token_env() -> String {
    "REPODRIVE_ADVISORY_TOKEN".to_string()
}

fn default_advisory_timeout_secs() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Projects and repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Host the project's repositories live on.
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Name of the environment variable holding the SSH password.  The
    /// password itself never appears in the config file.
    pub password_env: String,
    /// Prefix git invocations with `sudo` on this host.
    #[serde(default)]
    pub sudo: bool,
    pub repositories: HashMap<String, RepoConfig>,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    /// Absolute path of the working tree on the remote host.
    pub path: String,
    #[serde(default = "default_deploy_policy")]
    pub deploy_policy: DeployPolicy,
    /// Dist directory name under the working tree.
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,
}

fn default_deploy_policy() -> DeployPolicy {
    DeployPolicy::CopyOnly
}

fn default_dist_dir() -> String {
    "dist".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    config
        .server
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid listen address: {}", config.server.listen))?;

    for (project_name, project) in &config.projects {
        anyhow::ensure!(
            !project.host.trim().is_empty(),
            "project {project_name}: host must not be empty"
        );
        anyhow::ensure!(
            !project.username.trim().is_empty(),
            "project {project_name}: username must not be empty"
        );
        for (repo_name, repo) in &project.repositories {
            anyhow::ensure!(
                repo.path.starts_with('/'),
                "repository {project_name}/{repo_name}: path must be absolute"
            );
            anyhow::ensure!(
                !repo.dist_dir.is_empty()
                    && !repo.dist_dir.contains('/')
                    && repo.dist_dir != "..",
                "repository {project_name}/{repo_name}: dist_dir must be a plain directory name"
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  listen: "127.0.0.1:8080"
advisory:
  base_url: "https://advisory.internal"
projects:
  acme:
    host: "10.0.0.5"
    username: deploy
    password_env: ACME_SSH_PASSWORD
    repositories:
      web:
        path: /srv/web
        deploy_policy: commit-and-push
      api:
        path: /srv/api
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str(SAMPLE).expect("parse sample");
        validate_config(&config).expect("sample validates");

        let project = &config.projects["acme"];
        assert_eq!(project.port, 22);
        assert!(!project.sudo);

        let web = &project.repositories["web"];
        assert_eq!(web.deploy_policy, DeployPolicy::CommitAndPush);
        assert_eq!(web.dist_dir, "dist");

        let api = &project.repositories["api"];
        assert_eq!(api.deploy_policy, DeployPolicy::CopyOnly);

        let advisory = config.advisory.expect("advisory configured");
        assert_eq!(advisory.token_env, "REPODRIVE_ADVISORY_TOKEN");
        assert_eq!(advisory.timeout_secs, 10);
    }

    #[test]
    fn relative_repo_path_is_rejected() {
        let mangled = SAMPLE.replace("/srv/web", "srv/web");
        let config: Config = serde_yaml::from_str(&mangled).expect("parse");
        let err = validate_config(&config).expect_err("relative path must fail");
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn nested_dist_dir_is_rejected() {
        let mangled = SAMPLE.replace(
            "path: /srv/web",
            "path: /srv/web\n        dist_dir: ../dist",
        );
        let config: Config = serde_yaml::from_str(&mangled).expect("parse");
        let err = validate_config(&config).expect_err("nested dist_dir must fail");
        assert!(err.to_string().contains("plain directory name"));
    }

    #[test]
    fn invalid_listen_address_is_rejected() {
        let mangled = SAMPLE.replace("127.0.0.1:8080", "not-an-address");
        let config: Config = serde_yaml::from_str(&mangled).expect("parse");
        assert!(validate_config(&config).is_err());
    }
}
