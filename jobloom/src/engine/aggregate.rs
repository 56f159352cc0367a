//! Result aggregation: routing events back onto the graph.
//!
//! The orchestrator owns all graph mutation; these functions run under its
//! lock. An event's owning slot is found by searching, in order, the job's
//! lifecycle events, each step's own script, and each step's lifecycle
//! events. Expansion clones hook scripts under their lifecycle event's id,
//! which keeps this search unambiguous within a job.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::document::{FormMap, Job};
use crate::events::ResultEvent;
use crate::graph::{NodeIndex, WorkflowGraph};
use crate::status::RunningStatus;

/// Mark a script's slot running just before it executes.
pub(crate) fn begin_script(
    graph: &mut WorkflowGraph,
    node: NodeIndex,
    script_id: &str,
    now: DateTime<Utc>,
) {
    if let Some((_, status)) = slot_mut(&mut graph.node_mut(node).job, script_id) {
        status.begin(now);
    }
}

/// Append a routed event to its slot and apply the status transition.
///
/// Events that own no slot (job-scoped form requests) update nothing.
pub(crate) fn route_event(
    graph: &mut WorkflowGraph,
    node: NodeIndex,
    event: &ResultEvent,
    now: DateTime<Utc>,
) {
    match slot_mut(&mut graph.node_mut(node).job, event.script_id()) {
        Some((results, status)) => {
            results.push(event.clone());
            status.apply(event, now);
        }
        None => trace!(script = event.script_id(), "event owns no step slot"),
    }
}

/// Mark the failing script's slot after its executor reported an error.
pub(crate) fn fail_script(
    graph: &mut WorkflowGraph,
    node: NodeIndex,
    script_id: &str,
    now: DateTime<Utc>,
) {
    if let Some((_, status)) = slot_mut(&mut graph.node_mut(node).job, script_id) {
        status.fail(now);
    }
}

/// Store an accepted form map on the job or on one of its steps.
pub(crate) fn store_form_data(
    graph: &mut WorkflowGraph,
    node: NodeIndex,
    step_id: Option<&str>,
    data: FormMap,
) {
    let job = &mut graph.node_mut(node).job;
    match step_id {
        None => job.form_data = data,
        Some(step_id) => {
            if let Some(step) = job.steps.iter_mut().find(|s| s.id == step_id) {
                step.form_data = data;
            }
        }
    }
}

fn slot_mut<'a>(
    job: &'a mut Job,
    script_id: &str,
) -> Option<(&'a mut Vec<ResultEvent>, &'a mut RunningStatus)> {
    for event in &mut job.lifecycle {
        if event.id == script_id {
            return Some((&mut event.results, &mut event.status));
        }
    }
    for step in &mut job.steps {
        if step.script.id() == script_id {
            return Some((&mut step.results, &mut step.status));
        }
        for event in &mut step.lifecycle {
            if event.id == script_id {
                return Some((&mut event.results, &mut event.status));
            }
        }
    }
    None
}
