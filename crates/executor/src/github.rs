//! `github` engine: dispatch the workflow to hosted runners through `gh`.
//!
//! `gh workflow run` does not return the id of the run it creates, so the
//! backend polls the workflow's run list for a run created at or after the
//! trigger time, then attaches to it with `gh run watch`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use actlocal_core::types::Timestamp;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::backend::{ExecutionBackend, HostedJob, WorkUnit};
use crate::error::BackendError;
use crate::process::{capture_command, stream_command};
use crate::sink::OutputSink;

/// Tolerated clock difference between this machine and the provider.
const CLOCK_SKEW_SECS: i64 = 5;

static REMOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com[:/]+([^/\s]+)/([^/\s]+?)(?:\.git)?/?$")
        .expect("remote URL pattern is valid")
});

/// How long to look for the run created by `gh workflow run`.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(2),
        }
    }
}

pub struct HostedBackend {
    gh: PathBuf,
    git: PathBuf,
    poll: PollSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedRun {
    database_id: u64,
    created_at: Timestamp,
}

impl HostedBackend {
    pub fn new() -> Self {
        Self::with_programs("gh", "git", PollSettings::default())
    }

    pub fn with_programs(
        gh: impl Into<PathBuf>,
        git: impl Into<PathBuf>,
        poll: PollSettings,
    ) -> Self {
        Self {
            gh: gh.into(),
            git: git.into(),
            poll,
        }
    }

    fn gh(&self, root: &Path) -> Command {
        let mut cmd = Command::new(&self.gh);
        cmd.current_dir(root);
        cmd
    }

    async fn detect_repo(&self, root: &Path) -> Result<String, BackendError> {
        let mut cmd = Command::new(&self.git);
        cmd.args(["remote", "get-url", "origin"]).current_dir(root);
        let url = capture_command(cmd, "git").await?;
        parse_remote_url(&url)
            .ok_or_else(|| BackendError::Repository(format!("origin remote '{url}' is not on github.com")))
    }

    async fn run(
        &self,
        job: HostedJob,
        sink: &OutputSink,
        cancel: &CancellationToken,
    ) -> Result<i32, BackendError> {
        let repo = match &job.repo {
            Some(repo) => repo.clone(),
            None => self.detect_repo(&job.project_root).await?,
        };
        let workflow = workflow_file_name(&job.workflow_path);

        let triggered_at = chrono::Utc::now();
        let mut trigger = self.gh(&job.project_root);
        trigger.args(["workflow", "run", workflow.as_str(), "--repo", repo.as_str()]);
        if let Some(git_ref) = &job.git_ref {
            trigger.args(["--ref", git_ref.as_str()]);
        }
        for (key, value) in &job.inputs {
            trigger.arg("-f").arg(format!("{key}={value}"));
        }
        sink.line(format!("triggering {workflow} on {repo}"));
        tokio::select! {
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            triggered = capture_command(trigger, "gh") => {
                triggered?;
            }
        }

        let run_id = self
            .find_triggered_run(&job.project_root, &repo, &workflow, triggered_at, cancel)
            .await?;
        sink.line(format!(
            "watching run {run_id}: https://github.com/{repo}/actions/runs/{run_id}"
        ));
        tracing::info!(repo = %repo, run_id, "Attached to hosted run");

        let mut watch = self.gh(&job.project_root);
        let run_id = run_id.to_string();
        watch.args(["run", "watch", run_id.as_str(), "--repo", repo.as_str(), "--exit-status"]);
        stream_command(watch, "gh", sink, cancel).await
    }

    async fn find_triggered_run(
        &self,
        root: &Path,
        repo: &str,
        workflow: &str,
        triggered_at: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<u64, BackendError> {
        for attempt in 1..=self.poll.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                _ = tokio::time::sleep(self.poll.interval) => {}
            }

            let mut list = self.gh(root);
            list.args([
                "run", "list", "--workflow", workflow, "--repo", repo, "--json",
                "databaseId,createdAt", "--limit", "10",
            ]);
            let listing = capture_command(list, "gh").await?;
            let runs: Vec<ListedRun> = serde_json::from_str(&listing).map_err(|e| {
                BackendError::Command {
                    tool: "gh",
                    message: format!("unexpected run list output: {e}"),
                }
            })?;

            if let Some(id) = pick_triggered_run(&runs, triggered_at) {
                return Ok(id);
            }
            tracing::debug!(attempt, workflow, "Triggered run not listed yet");
        }
        Err(BackendError::RunNotFound {
            attempts: self.poll.attempts,
        })
    }
}

impl Default for HostedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn execute(
        &self,
        work: WorkUnit,
        sink: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> Result<i32, BackendError> {
        let WorkUnit::Hosted(job) = work else {
            return Err(BackendError::UnsupportedWork { backend: self.name() });
        };
        let sink = OutputSink::or_stdout(sink);
        self.run(job, &sink, &cancel).await
    }
}

/// `owner/name` from an `origin` URL in https, ssh or scp-like form.
pub fn parse_remote_url(url: &str) -> Option<String> {
    let caps = REMOTE_RE.captures(url.trim())?;
    Some(format!("{}/{}", &caps[1], &caps[2]))
}

/// The earliest listed run created no earlier than the trigger time, minus
/// the clock-skew allowance.
fn pick_triggered_run(runs: &[ListedRun], triggered_at: Timestamp) -> Option<u64> {
    let threshold = triggered_at - chrono::Duration::seconds(CLOCK_SKEW_SECS);
    runs.iter()
        .filter(|r| r.created_at >= threshold)
        .min_by_key(|r| r.created_at)
        .map(|r| r.database_id)
}

fn workflow_file_name(workflow_path: &str) -> String {
    Path::new(workflow_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| workflow_path.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_common_remote_forms() {
        for url in [
            "https://github.com/acme/widgets.git",
            "https://github.com/acme/widgets",
            "git@github.com:acme/widgets.git",
            "ssh://git@github.com/acme/widgets.git",
        ] {
            assert_eq!(parse_remote_url(url).as_deref(), Some("acme/widgets"), "{url}");
        }
        assert_eq!(parse_remote_url("https://gitlab.com/acme/widgets.git"), None);
    }

    #[test]
    fn picks_earliest_run_after_trigger() {
        let now = chrono::Utc::now();
        let runs = vec![
            ListedRun {
                database_id: 1,
                created_at: now - chrono::Duration::minutes(10),
            },
            ListedRun {
                database_id: 3,
                created_at: now + chrono::Duration::seconds(4),
            },
            ListedRun {
                database_id: 2,
                created_at: now + chrono::Duration::seconds(1),
            },
        ];
        assert_eq!(pick_triggered_run(&runs, now), Some(2));
        assert_eq!(pick_triggered_run(&runs[..1], now), None);
    }

    #[test]
    fn workflow_is_referenced_by_file_name() {
        assert_eq!(workflow_file_name(".github/workflows/ci.yml"), "ci.yml");
    }

    #[tokio::test]
    async fn missing_gh_is_tool_missing() {
        let backend = HostedBackend::with_programs(
            "/nonexistent/bin/gh",
            "git",
            PollSettings::default(),
        );
        let job = HostedJob {
            project_root: std::env::temp_dir(),
            workflow_path: ".github/workflows/ci.yml".into(),
            repo: Some("acme/widgets".into()),
            ..Default::default()
        };
        let result = backend
            .execute(WorkUnit::Hosted(job), None, CancellationToken::new())
            .await;
        assert_matches!(result, Err(BackendError::ToolMissing { tool: "gh" }));
    }

    #[cfg(unix)]
    fn fake_gh(dir: &Path, list_output: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("gh");
        let body = format!(
            r#"#!/bin/sh
case "$1 $2" in
  "workflow run") echo "$@" > "{calls}"; exit 0 ;;
  "run list") {list_output}; exit 0 ;;
  "run watch") echo "watching $3"; echo "conclusion: failure"; exit 1 ;;
esac
exit 99
"#,
            calls = dir.join("calls").display(),
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn triggers_polls_and_watches_the_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let gh = fake_gh(
            dir.path(),
            r#"echo "[{\"databaseId\": 42, \"createdAt\": \"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}]""#,
        );
        let backend = HostedBackend::with_programs(
            gh,
            "git",
            PollSettings {
                attempts: 3,
                interval: Duration::from_millis(10),
            },
        );
        let job = HostedJob {
            project_root: dir.path().to_path_buf(),
            workflow_path: ".github/workflows/deploy.yml".into(),
            repo: Some("acme/widgets".into()),
            git_ref: Some("main".into()),
            inputs: [("env".to_string(), "staging".to_string())].into(),
        };
        let (sink, mut rx) = OutputSink::channel();

        let code = backend
            .execute(WorkUnit::Hosted(job), Some(sink), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, 1);

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(
            calls.trim(),
            "workflow run deploy.yml --repo acme/widgets --ref main -f env=staging"
        );

        let mut output = String::new();
        while let Ok(chunk) = rx.try_recv() {
            output.push_str(&chunk);
        }
        assert!(output.contains("watching 42"));
        assert!(output.contains("actions/runs/42"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gives_up_when_run_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let gh = fake_gh(dir.path(), r#"echo "[]""#);
        let backend = HostedBackend::with_programs(
            gh,
            "git",
            PollSettings {
                attempts: 2,
                interval: Duration::from_millis(5),
            },
        );
        let job = HostedJob {
            project_root: dir.path().to_path_buf(),
            workflow_path: "ci.yml".into(),
            repo: Some("acme/widgets".into()),
            ..Default::default()
        };

        let result = backend
            .execute(WorkUnit::Hosted(job), None, CancellationToken::new())
            .await;
        assert_matches!(result, Err(BackendError::RunNotFound { attempts: 2 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_a_hanging_trigger() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let gh = dir.path().join("gh");
        std::fs::write(&gh, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&gh, std::fs::Permissions::from_mode(0o755)).unwrap();
        let backend = HostedBackend::with_programs(gh, "git", PollSettings::default());
        let job = HostedJob {
            project_root: dir.path().to_path_buf(),
            workflow_path: "ci.yml".into(),
            repo: Some("acme/widgets".into()),
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            backend.execute(WorkUnit::Hosted(job), None, cancel),
        )
        .await
        .expect("trigger is abandoned once cancelled");
        assert_matches!(result, Err(BackendError::Cancelled));
    }
}
