use std::path::PathBuf;
use std::str::FromStr;

use actlocal_core::project::{parse_project_list, Project};
use actlocal_executor::EngineEndpoint;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Daemon configuration loaded from environment variables.
///
/// All fields have defaults suitable for a developer machine; CLI flags
/// override individual values after loading.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `7421`).
    pub port: u16,
    /// Shared secret every request must present.
    pub token: String,
    /// Whether `token` was generated at startup rather than configured.
    pub token_generated: bool,
    /// Origin of the web dashboard, always allowed by CORS.
    pub dashboard_origin: String,
    /// Additional allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight runs, in seconds (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Simultaneous backend invocations; `0` means unbounded (default: `4`).
    pub max_concurrent_runs: usize,
    /// Image used by builtin runs that name none (default: `ubuntu:latest`).
    pub default_image: String,
    /// Projects registered at startup; the first becomes active.
    pub projects: Vec<Project>,
    /// Container engine location for the builtin and act engines.
    pub docker: EngineEndpoint,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `ACTLOCAL_HOST`                  | `127.0.0.1`              |
    /// | `ACTLOCAL_PORT`                  | `7421`                   |
    /// | `ACTLOCAL_TOKEN`                 | random, generated        |
    /// | `ACTLOCAL_DASHBOARD_ORIGIN`      | `http://localhost:5173`  |
    /// | `ACTLOCAL_CORS_ORIGINS`          | empty                    |
    /// | `ACTLOCAL_REQUEST_TIMEOUT_SECS`  | `30`                     |
    /// | `ACTLOCAL_SHUTDOWN_TIMEOUT_SECS` | `10`                     |
    /// | `ACTLOCAL_MAX_CONCURRENT_RUNS`   | `4`                      |
    /// | `ACTLOCAL_DEFAULT_IMAGE`         | `ubuntu:latest`          |
    /// | `ACTLOCAL_PROJECTS`              | empty (`id=path,...`)    |
    /// | `ACTLOCAL_DOCKER_HOST`           | unset                    |
    /// | `ACTLOCAL_DOCKER_CERT_PATH`      | unset                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let (token, token_generated) = match non_empty_var("ACTLOCAL_TOKEN") {
            Some(token) => (token, false),
            None => (uuid::Uuid::new_v4().simple().to_string(), true),
        };

        Ok(Self {
            host: non_empty_var("ACTLOCAL_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: parse_var("ACTLOCAL_PORT", 7421)?,
            token,
            token_generated,
            dashboard_origin: non_empty_var("ACTLOCAL_DASHBOARD_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".into()),
            cors_origins: split_list(&non_empty_var("ACTLOCAL_CORS_ORIGINS").unwrap_or_default()),
            request_timeout_secs: parse_var("ACTLOCAL_REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse_var("ACTLOCAL_SHUTDOWN_TIMEOUT_SECS", 10)?,
            max_concurrent_runs: parse_var("ACTLOCAL_MAX_CONCURRENT_RUNS", 4)?,
            default_image: non_empty_var("ACTLOCAL_DEFAULT_IMAGE")
                .unwrap_or_else(|| "ubuntu:latest".into()),
            projects: parse_project_list(&non_empty_var("ACTLOCAL_PROJECTS").unwrap_or_default()),
            docker: EngineEndpoint {
                host: non_empty_var("ACTLOCAL_DOCKER_HOST"),
                cert_path: non_empty_var("ACTLOCAL_DOCKER_CERT_PATH").map(PathBuf::from),
            },
        })
    }

    /// Every origin the CORS layer accepts: the dashboard, the daemon's own
    /// local addresses and any configured extras, without duplicates.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            self.dashboard_origin.clone(),
            format!("http://127.0.0.1:{}", self.port),
            format!("http://localhost:{}", self.port),
        ];
        for origin in &self.cors_origins {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        origins
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
