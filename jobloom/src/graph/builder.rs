//! DAG construction and validation.
//!
//! Turns a workflow's job list into a [`WorkflowGraph`]: one node per job,
//! dependency edges from `needs`, a synthetic root feeding every entry job
//! and a synthetic tail joined by every exit job. Workflow-level `setup`
//! scripts are promoted into the root's steps and `teardown` scripts into
//! the tail's, so the scheduler runs them like any other node.

use miette::Diagnostic;
use thiserror::Error;

use crate::document::{LifecyclePhase, Step, Workflow};
use crate::status::RunningStatus;

use super::node::{NodeIndex, WorkflowGraph, ROOT, TAIL};

/// Errors detected while building the execution graph.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate job identifier: {0}")]
    #[diagnostic(
        code(jobloom::graph::duplicate_node),
        help("Job identifiers must be unique; `root` and `tail` are reserved.")
    )]
    DuplicateNode(String),

    #[error("job {job} needs unknown job {dependency}")]
    #[diagnostic(
        code(jobloom::graph::missing_dependency),
        help("Every identifier in `needs` must name another job in the workflow.")
    )]
    MissingDependency { job: String, dependency: String },

    #[error("cyclic dependency: {}", path.join(" -> "))]
    #[diagnostic(
        code(jobloom::graph::cyclic_dependency),
        help("The `needs` references of these jobs form a cycle.")
    )]
    CyclicDependency { path: Vec<String> },

    #[error("execution must start from the workflow's root node")]
    #[diagnostic(code(jobloom::graph::not_root_node))]
    NotRootNode,
}

/// Build the execution graph for a workflow.
///
/// Deterministic: iteration order cannot affect the result because the
/// scheduler re-examines readiness after every completion.
pub fn build_graph(workflow: &Workflow) -> Result<WorkflowGraph, GraphError> {
    let mut graph = WorkflowGraph::new(workflow);

    for job in &workflow.jobs {
        if graph.insert(job.clone()).is_none() {
            return Err(GraphError::DuplicateNode(job.id.clone()));
        }
    }

    // Dependency edges, then root fan-out, then tail fan-in.
    for job in &workflow.jobs {
        let idx = graph.find(&job.id).expect("job inserted above");
        for dependency in &job.needs {
            let parent = match graph.find(dependency) {
                Some(parent) if parent != ROOT && parent != TAIL => parent,
                _ => {
                    return Err(GraphError::MissingDependency {
                        job: job.id.clone(),
                        dependency: dependency.clone(),
                    })
                }
            };
            graph.add_edge(parent, idx);
        }
        if job.needs.is_empty() {
            graph.add_edge(ROOT, idx);
        }
    }
    let exits: Vec<NodeIndex> = graph
        .iter()
        .filter(|(idx, node)| *idx != ROOT && *idx != TAIL && node.children.is_empty())
        .map(|(idx, _)| idx)
        .collect();
    for exit in exits {
        graph.add_edge(exit, TAIL);
    }
    if graph.children(ROOT).is_empty() {
        graph.add_edge(ROOT, TAIL);
    }

    promote_workflow_lifecycle(workflow, &mut graph);
    detect_cycles(&graph)?;
    Ok(graph)
}

/// Promote workflow-scoped `setup`/`teardown` hooks into the synthetic
/// endpoints. Each promoted step carries the lifecycle event's id, and its
/// script is re-tagged with that id so results route back unambiguously.
fn promote_workflow_lifecycle(workflow: &Workflow, graph: &mut WorkflowGraph) {
    for event in &workflow.lifecycle {
        let target = match event.phase {
            LifecyclePhase::Setup => ROOT,
            LifecyclePhase::Teardown => TAIL,
            _ => {
                graph.meta.retained_lifecycle.push(event.clone());
                continue;
            }
        };
        let step = Step {
            id: event.id.clone(),
            name: None,
            form: None,
            condition: None,
            script: event.script.clone_with_id(&event.id),
            lifecycle: Vec::new(),
            results: Vec::new(),
            status: RunningStatus::default(),
            form_data: Default::default(),
        };
        graph.node_mut(target).job.steps.push(step);
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Depth-first cycle check over the real jobs (root and tail excluded).
fn detect_cycles(graph: &WorkflowGraph) -> Result<(), GraphError> {
    let mut marks = vec![Mark::White; graph.node_count()];
    let mut path: Vec<NodeIndex> = Vec::new();

    fn visit(
        graph: &WorkflowGraph,
        idx: NodeIndex,
        marks: &mut [Mark],
        path: &mut Vec<NodeIndex>,
    ) -> Result<(), GraphError> {
        marks[idx] = Mark::Gray;
        path.push(idx);
        for &child in graph.children(idx) {
            if child == TAIL {
                continue;
            }
            match marks[child] {
                Mark::Gray => {
                    // Back-edge: the cycle is the path from the revisited
                    // node to the current one.
                    let start = path
                        .iter()
                        .position(|&n| n == child)
                        .expect("gray node is on the path");
                    let cycle = path[start..]
                        .iter()
                        .map(|&n| graph.node(n).id.clone())
                        .collect();
                    return Err(GraphError::CyclicDependency { path: cycle });
                }
                Mark::White => visit(graph, child, marks, path)?,
                Mark::Black => {}
            }
        }
        path.pop();
        marks[idx] = Mark::Black;
        Ok(())
    }

    for &idx in graph.job_order() {
        if marks[idx] == Mark::White {
            visit(graph, idx, &mut marks, &mut path)?;
        }
    }
    Ok(())
}
