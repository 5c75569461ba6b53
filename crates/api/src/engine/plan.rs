//! Validation and resolution of run requests.
//!
//! [`plan_run`] turns a [`CreateRunRequest`] into the immutable [`RunSpec`]
//! recorded on the run plus the [`WorkUnit`] handed to the backend. All
//! validation happens here, before any run is created.

use std::collections::BTreeMap;
use std::path::Path;

use actlocal_core::error::CoreError;
use actlocal_core::project::{Project, ProjectStore};
use actlocal_core::run::{Engine, RunSpec};
use actlocal_core::workflow::{Step, Workflow};
use actlocal_executor::{ContainerJob, HostedJob, LocalRunnerJob, WorkUnit};
use serde::Deserialize;

/// Body of `POST /runs`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub engine: Option<Engine>,
    pub image: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub workflow_path: Option<String>,
    pub job_id: Option<String>,
    pub project_id: Option<String>,
    pub event_name: Option<String>,
    pub event_path: Option<String>,
    pub secret_file: Option<String>,
    pub vars_file: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub repo: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// A validated request, ready to be recorded and executed.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub spec: RunSpec,
    pub work: WorkUnit,
}

/// Validate `req` and resolve its project, workflow and job.
///
/// `engine` defaults to `act`. Builtin runs take explicit `steps` or the
/// steps of a workflow job; `act` and `github` runs always need a
/// `workflowPath` inside a resolvable project.
pub fn plan_run(
    req: CreateRunRequest,
    projects: &dyn ProjectStore,
    default_image: &str,
) -> Result<PlannedRun, CoreError> {
    match req.engine.unwrap_or_default() {
        Engine::Builtin => plan_builtin(req, projects, default_image),
        engine @ (Engine::Act | Engine::Github) => plan_delegated(engine, req, projects),
    }
}

fn plan_builtin(
    req: CreateRunRequest,
    projects: &dyn ProjectStore,
    default_image: &str,
) -> Result<PlannedRun, CoreError> {
    let (project, job_id, steps, job_image) = if !req.steps.is_empty() {
        // Inline steps run without a project; mount one when available.
        let project = match req.project_id.as_deref() {
            Some(id) => Some(projects.resolve(Some(id))?),
            None => projects.active(),
        };
        (project, req.job_id.clone(), req.steps.clone(), None)
    } else if let Some(path) = req.workflow_path.as_deref() {
        let project = projects.resolve(req.project_id.as_deref())?;
        let workflow = load_workflow(&project, path)?;
        let (job_id, job) = workflow.resolve_job(req.job_id.as_deref(), path)?;
        let image = job.container_image().map(str::to_owned);
        let steps = job.steps.clone();
        (Some(project), Some(job_id.to_string()), steps, image)
    } else {
        return Err(CoreError::Validation(
            "builtin runs need either steps or a workflowPath".into(),
        ));
    };

    let image = req
        .image
        .clone()
        .or(job_image)
        .unwrap_or_else(|| default_image.to_string());
    let workdir = project.as_ref().map(|p| p.root_path.clone());

    let spec = RunSpec {
        engine: Engine::Builtin,
        project_id: project.as_ref().map(|p| p.id.clone()),
        project_root: workdir.clone(),
        workflow_path: req.workflow_path,
        job_id,
        image: Some(image.clone()),
        steps: steps.clone(),
        ..Default::default()
    };
    let work = WorkUnit::Container(ContainerJob {
        image,
        steps,
        workdir,
    });
    Ok(PlannedRun { spec, work })
}

fn plan_delegated(
    engine: Engine,
    req: CreateRunRequest,
    projects: &dyn ProjectStore,
) -> Result<PlannedRun, CoreError> {
    let path = req.workflow_path.clone().ok_or_else(|| {
        CoreError::Validation(format!("workflowPath is required for the {engine} engine"))
    })?;
    let project = projects.resolve(req.project_id.as_deref())?;

    // Steps are not extracted; the delegated tool runs the file itself. An
    // omitted job id resolves to the first declared job, as for builtin.
    let workflow = load_workflow(&project, &path)?;
    let (job_id, _) = workflow.resolve_job(req.job_id.as_deref(), &path)?;
    let job_id = job_id.to_string();

    let spec = RunSpec {
        engine,
        project_id: Some(project.id.clone()),
        project_root: Some(project.root_path.clone()),
        workflow_path: Some(path.clone()),
        job_id: Some(job_id.clone()),
        event_name: req.event_name.clone(),
        event_path: req.event_path.clone(),
        secret_file: req.secret_file.clone(),
        vars_file: req.vars_file.clone(),
        platforms: req.platforms.clone(),
        repo: req.repo.clone(),
        git_ref: req.git_ref.clone(),
        inputs: req.inputs.clone(),
        ..Default::default()
    };

    let work = match engine {
        Engine::Github => WorkUnit::Hosted(HostedJob {
            project_root: project.root_path,
            workflow_path: path,
            repo: req.repo,
            git_ref: req.git_ref,
            inputs: req.inputs,
        }),
        _ => WorkUnit::LocalRunner(LocalRunnerJob {
            project_root: project.root_path,
            workflow_path: path,
            job_id: Some(job_id),
            event_name: req.event_name,
            event_path: req.event_path,
            secret_file: req.secret_file,
            vars_file: req.vars_file,
            platforms: req.platforms,
        }),
    };
    Ok(PlannedRun { spec, work })
}

fn load_workflow(project: &Project, workflow_path: &str) -> Result<Workflow, CoreError> {
    let full = project.root().join(Path::new(workflow_path));
    Workflow::load(&full)
}

#[cfg(test)]
mod tests {
    use actlocal_core::project::InMemoryProjectStore;
    use assert_matches::assert_matches;

    use super::*;

    const WORKFLOW: &str = r#"
name: CI
jobs:
  test:
    container: rust:1.80
    steps:
      - uses: actions/checkout@v4
      - run: cargo test
  lint:
    steps:
      - run: cargo clippy
"#;

    fn project_with_workflow() -> (tempfile::TempDir, InMemoryProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let wf_dir = dir.path().join(".github/workflows");
        std::fs::create_dir_all(&wf_dir).unwrap();
        std::fs::write(wf_dir.join("ci.yml"), WORKFLOW).unwrap();
        let store =
            InMemoryProjectStore::with_first_active([Project::with_id("demo", dir.path())]);
        (dir, store)
    }

    fn request(engine: Engine) -> CreateRunRequest {
        CreateRunRequest {
            engine: Some(engine),
            workflow_path: Some(".github/workflows/ci.yml".into()),
            ..Default::default()
        }
    }

    #[test]
    fn builtin_inline_steps_need_no_project() {
        let store = InMemoryProjectStore::default();
        let req = CreateRunRequest {
            engine: Some(Engine::Builtin),
            steps: vec![Step::run("echo hi")],
            ..Default::default()
        };
        let planned = plan_run(req, &store, "ubuntu:latest").unwrap();

        assert_eq!(planned.spec.image.as_deref(), Some("ubuntu:latest"));
        assert_eq!(planned.spec.project_id, None);
        assert_matches!(planned.work, WorkUnit::Container(job) if job.workdir.is_none());
    }

    #[test]
    fn builtin_workflow_without_project_fails() {
        let store = InMemoryProjectStore::default();
        assert_matches!(
            plan_run(request(Engine::Builtin), &store, "ubuntu:latest"),
            Err(CoreError::NoActiveProject)
        );
    }

    #[test]
    fn builtin_workflow_uses_first_job_and_its_container() {
        let (_dir, store) = project_with_workflow();
        let planned = plan_run(request(Engine::Builtin), &store, "ubuntu:latest").unwrap();

        assert_eq!(planned.spec.job_id.as_deref(), Some("test"));
        assert_eq!(planned.spec.image.as_deref(), Some("rust:1.80"));
        assert_eq!(planned.spec.project_id.as_deref(), Some("demo"));
        match planned.work {
            WorkUnit::Container(job) => {
                assert_eq!(job.steps.len(), 2);
                assert!(job.workdir.is_some());
            }
            other => panic!("expected container work, got {other:?}"),
        }
    }

    #[test]
    fn explicit_image_wins_over_job_container() {
        let (_dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            image: Some("alpine:3".into()),
            job_id: Some("lint".into()),
            ..request(Engine::Builtin)
        };
        let planned = plan_run(req, &store, "ubuntu:latest").unwrap();
        assert_eq!(planned.spec.image.as_deref(), Some("alpine:3"));
    }

    #[test]
    fn unknown_job_is_rejected() {
        let (_dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            job_id: Some("deploy".into()),
            ..request(Engine::Builtin)
        };
        assert_matches!(
            plan_run(req, &store, "ubuntu:latest"),
            Err(CoreError::JobNotFound { .. })
        );
    }

    #[test]
    fn builtin_without_steps_or_workflow_is_invalid() {
        let req = CreateRunRequest {
            engine: Some(Engine::Builtin),
            ..Default::default()
        };
        assert_matches!(
            plan_run(req, &InMemoryProjectStore::default(), "ubuntu:latest"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn engine_defaults_to_act_which_requires_workflow_path() {
        let (_dir, store) = project_with_workflow();
        assert_matches!(
            plan_run(CreateRunRequest::default(), &store, "ubuntu:latest"),
            Err(CoreError::Validation(msg)) if msg.contains("act")
        );
    }

    #[test]
    fn act_request_builds_local_runner_work() {
        let (dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            job_id: Some("lint".into()),
            event_name: Some("push".into()),
            ..request(Engine::Act)
        };
        let planned = plan_run(req, &store, "ubuntu:latest").unwrap();

        assert_eq!(planned.spec.engine, Engine::Act);
        match planned.work {
            WorkUnit::LocalRunner(job) => {
                assert_eq!(job.project_root, dir.path());
                assert_eq!(job.job_id.as_deref(), Some("lint"));
                assert_eq!(job.event_name.as_deref(), Some("push"));
            }
            other => panic!("expected local runner work, got {other:?}"),
        }
    }

    #[test]
    fn act_request_without_job_targets_the_first_job() {
        let (_dir, store) = project_with_workflow();
        let planned = plan_run(request(Engine::Act), &store, "ubuntu:latest").unwrap();

        assert_eq!(planned.spec.job_id.as_deref(), Some("test"));
        assert_matches!(
            planned.work,
            WorkUnit::LocalRunner(job) if job.job_id.as_deref() == Some("test")
        );
    }

    #[test]
    fn delegated_request_with_unknown_job_is_rejected() {
        let (_dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            job_id: Some("deploy".into()),
            ..request(Engine::Github)
        };
        assert_matches!(
            plan_run(req, &store, "ubuntu:latest"),
            Err(CoreError::JobNotFound { .. })
        );
    }

    #[test]
    fn github_requires_project() {
        let store = InMemoryProjectStore::default();
        assert_matches!(
            plan_run(request(Engine::Github), &store, "ubuntu:latest"),
            Err(CoreError::NoActiveProject)
        );
    }

    #[test]
    fn github_request_builds_hosted_work() {
        let (_dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            repo: Some("acme/widgets".into()),
            git_ref: Some("main".into()),
            ..request(Engine::Github)
        };
        let planned = plan_run(req, &store, "ubuntu:latest").unwrap();
        assert_matches!(
            planned.work,
            WorkUnit::Hosted(job) if job.repo.as_deref() == Some("acme/widgets")
        );
    }

    #[test]
    fn missing_workflow_file_is_a_workflow_error() {
        let (_dir, store) = project_with_workflow();
        let req = CreateRunRequest {
            workflow_path: Some(".github/workflows/missing.yml".into()),
            ..request(Engine::Act)
        };
        assert_matches!(
            plan_run(req, &store, "ubuntu:latest"),
            Err(CoreError::Workflow(_))
        );
    }
}
