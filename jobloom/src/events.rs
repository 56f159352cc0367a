//! Result events and the emitter handed to script executors.
//!
//! Every executor reports progress as [`ResultEvent`]s pushed through an
//! [`EventEmitter`]. The engine's orchestrator is the single consumer: it
//! routes each event onto the owning step or lifecycle slot, re-projects the
//! workflow snapshot, and forwards the pair to the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::FormMap;
use crate::executors::ExecutorError;
use crate::graph::NodeIndex;

/// One emission of the execution stream.
///
/// Every variant names the script that produced it via `script_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum ResultEvent {
    /// A buffered read of a shell script's combined stdout and stderr.
    #[serde(rename = "shellOutput")]
    Shell(ShellChunk),
    /// A template render finished writing one output file.
    #[serde(rename = "templateProgress")]
    Template(TemplateProgress),
    /// A script ran to completion; always the last event tagged with its id.
    #[serde(rename = "stepBoundary")]
    Boundary(StepBoundary),
    /// Execution is suspended until form data arrives for `unique_id`.
    #[serde(rename = "formRequest")]
    Form(FormRequest),
}

impl ResultEvent {
    pub fn shell(script_id: impl Into<String>, chunk: impl Into<String>) -> Self {
        ResultEvent::Shell(ShellChunk {
            script_id: script_id.into(),
            chunk: chunk.into(),
        })
    }

    pub fn template(
        script_id: impl Into<String>,
        path: impl Into<String>,
        completed: f32,
    ) -> Self {
        ResultEvent::Template(TemplateProgress {
            script_id: script_id.into(),
            path: path.into(),
            completed,
        })
    }

    pub fn boundary(script_id: impl Into<String>) -> Self {
        ResultEvent::Boundary(StepBoundary {
            script_id: script_id.into(),
        })
    }

    /// The identifier of the script this event originated from.
    pub fn script_id(&self) -> &str {
        match self {
            ResultEvent::Shell(e) => &e.script_id,
            ResultEvent::Template(e) => &e.script_id,
            ResultEvent::Boundary(e) => &e.script_id,
            ResultEvent::Form(e) => &e.script_id,
        }
    }
}

impl fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultEvent::Shell(e) => write!(f, "[{}] {}", e.script_id, e.chunk),
            ResultEvent::Template(e) => {
                write!(f, "[{}] wrote {} ({:.0}%)", e.script_id, e.path, e.completed * 100.0)
            }
            ResultEvent::Boundary(e) => write!(f, "[{}] done", e.script_id),
            ResultEvent::Form(e) => write!(f, "[{}] awaiting form {}", e.script_id, e.unique_id),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellChunk {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    pub chunk: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TemplateProgress {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    /// The output path that was written.
    pub path: String,
    /// Completion fraction over the script's file list, in `[0, 1]`.
    pub completed: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepBoundary {
    #[serde(rename = "scriptId")]
    pub script_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FormRequest {
    /// The step's script for step-scoped requests; the job id for job-scoped
    /// requests (which own no step slot).
    #[serde(rename = "scriptId")]
    pub script_id: String,
    /// Rendezvous identifier, unique for the lifetime of the engine.
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    /// The requested form's JSON schema.
    pub schema: Value,
}

/// Error returned when an emitter's consuming side is gone.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("event channel closed")]
    Closed,
}

/// Channel-backed emitter a script executor writes its events into.
///
/// Cloneable and cheap; the orchestrator tags each event with the producing
/// graph node so results from parallel jobs stay routable.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    node: NodeIndex,
    tx: flume::Sender<Signal>,
}

impl EventEmitter {
    pub(crate) fn new(node: NodeIndex, tx: flume::Sender<Signal>) -> Self {
        Self { node, tx }
    }

    /// Emit an event in a synchronous, non-blocking manner.
    pub fn emit(&self, event: ResultEvent) -> Result<(), EmitError> {
        self.tx
            .send(Signal::Emitted {
                node: self.node,
                event,
            })
            .map_err(|_| EmitError::Closed)
    }
}

/// Internal traffic from node tasks to the orchestrator.
#[derive(Debug)]
pub(crate) enum Signal {
    /// A script is about to run; mark its slot `running`.
    ScriptStarted { node: NodeIndex, script_id: String },
    /// An executor produced an event.
    Emitted { node: NodeIndex, event: ResultEvent },
    /// A form rendezvous completed; store the accepted map.
    FormAccepted {
        node: NodeIndex,
        step_id: Option<String>,
        data: FormMap,
    },
    /// The node ran all its scripts, or failed partway through.
    Finished {
        node: NodeIndex,
        outcome: Result<(), NodeFailure>,
    },
}

/// A script failure that terminates the whole execution.
#[derive(Debug)]
pub(crate) struct NodeFailure {
    pub script_id: String,
    pub error: ExecutorError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_id_is_exposed_for_every_variant() {
        let events = [
            ResultEvent::shell("s1", "hello"),
            ResultEvent::template("s2", "out/a.yml", 0.5),
            ResultEvent::boundary("s3"),
            ResultEvent::Form(FormRequest {
                script_id: "s4".into(),
                unique_id: "job_x_0".into(),
                schema: serde_json::json!({}),
            }),
        ];
        let ids: Vec<&str> = events.iter().map(ResultEvent::script_id).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4"]);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = ResultEvent::shell("s1", "line");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "shellOutput");
        assert_eq!(value["scriptId"], "s1");

        let event = ResultEvent::template("s2", "out", 1.0);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "templateProgress");
        assert_eq!(value["completed"], 1.0);
    }

    #[test]
    fn emitter_reports_closed_channel() {
        let (tx, rx) = flume::unbounded();
        let emitter = EventEmitter::new(0, tx);
        drop(rx);
        assert!(matches!(
            emitter.emit(ResultEvent::boundary("s")),
            Err(EmitError::Closed)
        ));
    }
}
