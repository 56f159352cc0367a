use std::time::Duration;

use jobloom::document::{Job, Script, Step, Workflow};
use jobloom::engine::{EngineError, ExecutionStream};
use jobloom::events::ResultEvent;

/// A step running a shell command, with a stable id.
pub fn shell_step(id: &str, command: &str) -> Step {
    Step::new(Script::bash(command).clone_with_id(format!("{id}-script"))).with_id(id)
}

/// A single-step shell job.
pub fn shell_job(id: &str, command: &str) -> Job {
    Job::new(id).with_step(shell_step(&format!("{id}-step"), command))
}

/// Drain a stream to its end under a generous deadline.
pub async fn drain(stream: ExecutionStream) -> (Vec<(Workflow, ResultEvent)>, Option<EngineError>) {
    tokio::time::timeout(Duration::from_secs(30), stream.drain())
        .await
        .expect("execution did not finish in time")
}

/// The trimmed shell output chunks, in arrival order.
pub fn shell_chunks(pairs: &[(Workflow, ResultEvent)]) -> Vec<String> {
    pairs
        .iter()
        .filter_map(|(_, event)| match event {
            ResultEvent::Shell(chunk) => Some(chunk.chunk.trim().to_string()),
            _ => None,
        })
        .collect()
}

/// Script ids of the boundary events, in arrival order.
pub fn boundary_ids(pairs: &[(Workflow, ResultEvent)]) -> Vec<String> {
    pairs
        .iter()
        .filter_map(|(_, event)| match event {
            ResultEvent::Boundary(b) => Some(b.script_id.clone()),
            _ => None,
        })
        .collect()
}
