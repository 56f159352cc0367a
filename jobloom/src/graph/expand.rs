//! Job expansion: flattening a job into the ordered scripts it runs.
//!
//! Order: `beforeJob` hooks, then for each step in declaration order its
//! `beforeStep` hooks, main script, and `afterStep` hooks, and finally the
//! `afterJob` hooks. Hook scripts are cloned under their owning lifecycle
//! event's identifier so the aggregator can route their results back.

use crate::document::{Job, LifecyclePhase, Script};

/// One entry of a job's flattened script sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpandedScript {
    pub script: Script,
    /// The owning step for step-scoped entries (hooks and main script);
    /// `None` for job-scoped hooks. Scopes step-level form data.
    pub step_id: Option<String>,
}

/// Flatten a job into its ordered script sequence.
///
/// Deterministic: the same job always yields the same list, including the
/// per-hook cloned identifiers.
pub fn expand_job(job: &Job) -> Vec<ExpandedScript> {
    let mut scripts = Vec::new();

    for event in job
        .lifecycle
        .iter()
        .filter(|e| e.phase == LifecyclePhase::BeforeJob)
    {
        scripts.push(ExpandedScript {
            script: event.script.clone_with_id(&event.id),
            step_id: None,
        });
    }

    for step in &job.steps {
        for event in step
            .lifecycle
            .iter()
            .filter(|e| e.phase == LifecyclePhase::BeforeStep)
        {
            scripts.push(ExpandedScript {
                script: event.script.clone_with_id(&event.id),
                step_id: Some(step.id.clone()),
            });
        }
        scripts.push(ExpandedScript {
            script: step.script.clone(),
            step_id: Some(step.id.clone()),
        });
        for event in step
            .lifecycle
            .iter()
            .filter(|e| e.phase == LifecyclePhase::AfterStep)
        {
            scripts.push(ExpandedScript {
                script: event.script.clone_with_id(&event.id),
                step_id: Some(step.id.clone()),
            });
        }
    }

    for event in job
        .lifecycle
        .iter()
        .filter(|e| e.phase == LifecyclePhase::AfterJob)
    {
        scripts.push(ExpandedScript {
            script: event.script.clone_with_id(&event.id),
            step_id: None,
        });
    }

    scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{LifecycleEvent, Step};

    fn hook(phase: LifecyclePhase, id: &str) -> LifecycleEvent {
        LifecycleEvent::new(phase, Script::bash(format!("echo {id}"))).with_id(id)
    }

    #[test]
    fn hooks_wrap_steps_in_declaration_order() {
        let job = Job::new("j")
            .with_lifecycle(hook(LifecyclePhase::BeforeJob, "before-job"))
            .with_lifecycle(hook(LifecyclePhase::AfterJob, "after-job"))
            .with_step(
                Step::new(Script::bash("echo one"))
                    .with_id("one")
                    .with_lifecycle(hook(LifecyclePhase::BeforeStep, "pre-one"))
                    .with_lifecycle(hook(LifecyclePhase::AfterStep, "post-one")),
            )
            .with_step(Step::new(Script::bash("echo two")).with_id("two"));

        let expanded = expand_job(&job);
        let ids: Vec<&str> = expanded.iter().map(|e| e.script.id()).collect();
        assert_eq!(ids[0], "before-job");
        assert_eq!(ids[1], "pre-one");
        // main script of step one keeps its own id
        assert_eq!(ids[2], job.steps[0].script.id());
        assert_eq!(ids[3], "post-one");
        assert_eq!(ids[4], job.steps[1].script.id());
        assert_eq!(ids[5], "after-job");
        assert_eq!(expanded.len(), 6);

        let steps: Vec<Option<&str>> = expanded.iter().map(|e| e.step_id.as_deref()).collect();
        assert_eq!(
            steps,
            vec![None, Some("one"), Some("one"), Some("one"), Some("two"), None]
        );
    }

    #[test]
    fn expansion_is_idempotent() {
        let job = Job::new("j")
            .with_lifecycle(hook(LifecyclePhase::BeforeJob, "b"))
            .with_step(
                Step::new(Script::bash("echo x"))
                    .with_id("x")
                    .with_lifecycle(hook(LifecyclePhase::AfterStep, "a")),
            );
        assert_eq!(expand_job(&job), expand_job(&job));
    }

    #[test]
    fn empty_job_expands_to_nothing() {
        assert!(expand_job(&Job::new("empty")).is_empty());
    }
}
