//! Run lifecycle types shared by the registry, the dispatcher and the API.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{RunId, Timestamp};
use crate::workflow::Step;

/// Lifecycle state of a run.
///
/// Transitions only move forward: `queued -> running -> success | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which execution backend drives a run.
///
/// * `builtin` -- ephemeral container, steps executed one by one.
/// * `act` -- the external local workflow runner.
/// * `github` -- hosted runners via the `gh` CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Builtin,
    #[default]
    Act,
    Github,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Builtin => "builtin",
            Engine::Act => "act",
            Engine::Github => "github",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(Engine::Builtin),
            "act" => Ok(Engine::Act),
            "github" => Ok(Engine::Github),
            other => Err(format!(
                "unknown engine '{other}' (expected builtin, act or github)"
            )),
        }
    }
}

/// Resolved parameters of a run, fixed at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    pub engine: Engine,
    pub project_id: Option<String>,
    pub project_root: Option<PathBuf>,
    pub workflow_path: Option<String>,
    pub job_id: Option<String>,

    // --- builtin ---
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,

    // --- act ---
    pub event_name: Option<String>,
    pub event_path: Option<String>,
    pub secret_file: Option<String>,
    pub vars_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    // --- github ---
    pub repo: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
}

/// Metadata view of a run. Never carries the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: RunId,
    pub status: RunStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub spec: RunSpec,
    /// Set exactly once, on the terminal transition.
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// How a backend invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The backend reported an exit code.
    Exited(i32),
    /// The invocation itself failed; the run is recorded with exit code 1.
    Errored(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Exited(code) => *code,
            RunOutcome::Errored(_) => 1,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Exited(0) => RunStatus::Success,
            _ => RunStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunOutcome::Exited(_) => None,
            RunOutcome::Errored(msg) => Some(msg),
        }
    }
}
