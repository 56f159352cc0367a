//! Projection of the mutable graph back into a workflow-shaped snapshot.
//!
//! Root and tail never appear as jobs: their steps are projected back into
//! workflow-level `setup` and `teardown` lifecycle events, carrying the
//! result logs and statuses accumulated so far.

use crate::document::{LifecycleEvent, LifecyclePhase, Step, Workflow};

use super::node::{WorkflowGraph, ROOT, TAIL};

impl WorkflowGraph {
    /// Copy the graph into a workflow snapshot.
    pub fn project(&self) -> Workflow {
        let mut lifecycle: Vec<LifecycleEvent> = self
            .node(ROOT)
            .job
            .steps
            .iter()
            .map(|step| step_to_event(step, LifecyclePhase::Setup))
            .collect();
        lifecycle.extend(self.meta.retained_lifecycle.iter().cloned());
        lifecycle.extend(
            self.node(TAIL)
                .job
                .steps
                .iter()
                .map(|step| step_to_event(step, LifecyclePhase::Teardown)),
        );

        Workflow {
            global_config: self.meta.global_config.clone(),
            permissions: self.meta.permissions.clone(),
            environment: self.meta.environment.clone(),
            lifecycle,
            jobs: self
                .job_order()
                .iter()
                .map(|&idx| self.node(idx).job.clone())
                .collect(),
        }
    }
}

fn step_to_event(step: &Step, phase: LifecyclePhase) -> LifecycleEvent {
    LifecycleEvent {
        id: step.id.clone(),
        phase,
        script: step.script.clone(),
        results: step.results.clone(),
        status: step.status.clone(),
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{Job, LifecycleEvent, LifecyclePhase, Script, Step, Workflow};
    use crate::graph::build_graph;

    #[test]
    fn projection_restores_workflow_shape() {
        let workflow = Workflow::default()
            .with_lifecycle(
                LifecycleEvent::new(LifecyclePhase::Setup, Script::bash("echo s")).with_id("s"),
            )
            .with_lifecycle(
                LifecycleEvent::new(LifecyclePhase::Teardown, Script::bash("echo t")).with_id("t"),
            )
            .with_job(Job::new("one").with_step(Step::new(Script::bash("true"))))
            .with_job(Job::new("two").with_step(Step::new(Script::bash("true"))));

        let graph = build_graph(&workflow).unwrap();
        let snapshot = graph.project();

        let ids: Vec<&str> = snapshot.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);

        assert_eq!(snapshot.lifecycle.len(), 2);
        assert_eq!(snapshot.lifecycle[0].id, "s");
        assert_eq!(snapshot.lifecycle[0].phase, LifecyclePhase::Setup);
        assert_eq!(snapshot.lifecycle[1].id, "t");
        assert_eq!(snapshot.lifecycle[1].phase, LifecyclePhase::Teardown);
    }
}
