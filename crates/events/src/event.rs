//! Wire format of the events pushed to subscribers.

use actlocal_core::run::RunSummary;
use actlocal_core::types::RunId;
use serde::{Deserialize, Serialize};

/// An event delivered over the subscriber stream, tagged by `type`.
///
/// `Hello` goes only to a newly connected subscriber; every other variant
/// is broadcast to all subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// Snapshot of all runs, newest first.
    #[serde(rename = "hello")]
    Hello { runs: Vec<RunSummary> },

    #[serde(rename = "run.created")]
    Created { run: RunSummary },

    #[serde(rename = "run.updated")]
    Updated { run: RunSummary },

    /// An incremental log chunk, not the accumulated buffer.
    #[serde(rename = "run.log")]
    Log { id: RunId, chunk: String },

    #[serde(rename = "run.finished")]
    Finished {
        run: RunSummary,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Hello { .. } => "hello",
            RunEvent::Created { .. } => "run.created",
            RunEvent::Updated { .. } => "run.updated",
            RunEvent::Log { .. } => "run.log",
            RunEvent::Finished { .. } => "run.finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use actlocal_core::registry::RunRegistry;
    use actlocal_core::run::{RunOutcome, RunSpec};

    use super::*;

    #[test]
    fn log_event_wire_shape() {
        let event = RunEvent::Log {
            id: "r1".into(),
            chunk: "hi\n".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run.log");
        assert_eq!(json["id"], "r1");
        assert_eq!(json["chunk"], "hi\n");
    }

    #[test]
    fn finished_event_carries_optional_error() {
        let registry = RunRegistry::new();
        let run = registry.create(RunSpec::default());
        registry.mark_running(&run.id).unwrap();
        let outcome = RunOutcome::Errored("engine unreachable".into());
        let run = registry.finish(&run.id, &outcome).unwrap();

        let with_error = RunEvent::Finished {
            run: run.clone(),
            error: outcome.error().map(str::to_owned),
        };
        let json = serde_json::to_value(&with_error).unwrap();
        assert_eq!(json["type"], "run.finished");
        assert_eq!(json["error"], "engine unreachable");
        assert_eq!(json["run"]["exitCode"], 1);
        assert_eq!(json["run"]["status"], "failed");

        let without = RunEvent::Finished { run, error: None };
        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn events_round_trip_through_json() {
        let registry = RunRegistry::new();
        let run = registry.create(RunSpec::default());
        let event = RunEvent::Created { run };

        let text = serde_json::to_string(&event).unwrap();
        let back: RunEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "run.created");
    }
}
