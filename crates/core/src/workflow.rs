//! Minimal workflow file model.
//!
//! Only the structure the runner consumes is modelled: ordered jobs, their
//! container image and their ordered steps. Expressions, matrices and
//! conditionals are carried through untouched (or ignored).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// Directory, relative to a project root, that holds workflow files.
pub const WORKFLOWS_DIR: &str = ".github/workflows";

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: Option<String>,
    /// Jobs in declaration order.
    #[serde(default)]
    pub jobs: IndexMap<String, Job>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<JobContainer>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// `container:` accepts either a bare image or a mapping with an `image` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JobContainer {
    Image(String),
    Spec { image: String },
}

/// A single workflow step. Only `run` steps execute in the builtin engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_env",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,
}

impl Step {
    /// Shell step with just a command.
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            run: Some(command.into()),
            ..Default::default()
        }
    }

    /// Human-readable label used in log lines.
    pub fn label(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(run) = &self.run {
            if let Some(first) = run.lines().map(str::trim).find(|l| !l.is_empty()) {
                return first.to_string();
            }
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        format!("step {}", index + 1)
    }
}

impl Job {
    pub fn container_image(&self) -> Option<&str> {
        match self.container.as_ref()? {
            JobContainer::Image(image) | JobContainer::Spec { image } => Some(image.as_str()),
        }
    }
}

impl Workflow {
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(source).map_err(|e| CoreError::Workflow(e.to_string()))
    }

    /// Read and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Workflow(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&source)
            .map_err(|e| CoreError::Workflow(format!("{}: {e}", path.display())))
    }

    /// Resolve a job by id, defaulting to the first declared job.
    pub fn resolve_job<'a>(
        &'a self,
        job_id: Option<&str>,
        workflow_label: &str,
    ) -> Result<(&'a str, &'a Job), CoreError> {
        match job_id {
            Some(id) => self
                .jobs
                .get_key_value(id)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| CoreError::JobNotFound {
                    job_id: id.to_string(),
                    workflow: workflow_label.to_string(),
                }),
            None => self
                .jobs
                .first()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    CoreError::Workflow(format!("{workflow_label} declares no jobs"))
                }),
        }
    }
}

/// A workflow file found under a project's workflow directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub name: Option<String>,
    pub jobs: Vec<String>,
}

/// List `*.yml` / `*.yaml` files under `<root>/.github/workflows`, sorted by
/// path. A missing directory yields an empty list; files that fail to parse
/// are listed without a name or jobs.
pub fn discover_workflows(root: &Path) -> Result<Vec<WorkflowFile>, CoreError> {
    let dir = root.join(WORKFLOWS_DIR);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "cannot list {}: {e}",
                dir.display()
            )))
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_workflow_file(p))
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let parsed = Workflow::load(&path).ok();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            WorkflowFile {
                path: format!("{WORKFLOWS_DIR}/{file_name}"),
                name: parsed.as_ref().and_then(|w| w.name.clone()),
                jobs: parsed
                    .map(|w| w.jobs.into_keys().collect())
                    .unwrap_or_default(),
            }
        })
        .collect())
}

fn is_workflow_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Accept scalar env values of any type and store them as strings.
fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, scalar_to_string(v)))
        .collect())
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s,
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
