//! Dotted-path lookup over the live graph.
//!
//! Grammar: `jobs[index]` or `jobs.id` selects a job, `.steps[index]` or
//! `.steps.id` a step, and a trailing `.results` or `.formData` selects a
//! step's result log or the last accepted form map.

use miette::Diagnostic;
use thiserror::Error;

use crate::document::{FormMap, Job, Step};
use crate::events::ResultEvent;

use super::node::WorkflowGraph;

#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("invalid path: {0}")]
    #[diagnostic(
        code(jobloom::path::invalid),
        help("Paths look like `jobs.build`, `jobs[0].steps[1].results`, or `jobs.build.formData`.")
    )]
    InvalidPath(String),
}

/// The value a path resolves to.
#[derive(Clone, Debug, PartialEq)]
pub enum PathValue {
    Job(Job),
    Step(Step),
    Results(Vec<ResultEvent>),
    FormData(FormMap),
}

#[derive(Debug, PartialEq)]
enum Segment {
    Name(String),
    Indexed(String, usize),
}

fn parse_segments(path: &str) -> Result<Vec<Segment>, PathError> {
    if path.is_empty() {
        return Err(PathError::InvalidPath("empty path".into()));
    }
    path.split('.')
        .map(|raw| {
            if raw.is_empty() {
                return Err(PathError::InvalidPath("empty path segment".into()));
            }
            match raw.split_once('[') {
                None => Ok(Segment::Name(raw.to_string())),
                Some((name, rest)) => {
                    let digits = rest.strip_suffix(']').ok_or_else(|| {
                        PathError::InvalidPath(format!("unterminated index in `{raw}`"))
                    })?;
                    let index = digits.parse::<usize>().map_err(|_| {
                        PathError::InvalidPath(format!("invalid index `{digits}` in `{raw}`"))
                    })?;
                    Ok(Segment::Indexed(name.to_string(), index))
                }
            }
        })
        .collect()
}

impl WorkflowGraph {
    /// Resolve a dotted path against the current graph state.
    pub fn lookup(&self, path: &str) -> Result<PathValue, PathError> {
        let segments = parse_segments(path)?;
        let mut cursor = segments.iter();

        let job = match cursor.next() {
            Some(Segment::Indexed(name, index)) if name == "jobs" => {
                let idx = self.job_order().get(*index).copied().ok_or_else(|| {
                    PathError::InvalidPath(format!("job index {index} out of bounds"))
                })?;
                &self.node(idx).job
            }
            Some(Segment::Name(name)) if name == "jobs" => {
                let id = match cursor.next() {
                    Some(Segment::Name(id)) => id,
                    _ => {
                        return Err(PathError::InvalidPath(
                            "expected a job identifier after `jobs`".into(),
                        ))
                    }
                };
                let idx = self
                    .job_order()
                    .iter()
                    .copied()
                    .find(|&idx| self.node(idx).id == *id)
                    .ok_or_else(|| PathError::InvalidPath(format!("unknown job `{id}`")))?;
                &self.node(idx).job
            }
            _ => {
                return Err(PathError::InvalidPath(
                    "paths must start with `jobs`".into(),
                ))
            }
        };

        let step = match cursor.next() {
            None => return Ok(PathValue::Job(job.clone())),
            Some(Segment::Name(name)) if name == "formData" => {
                return finish(cursor, PathValue::FormData(job.form_data.clone()))
            }
            Some(Segment::Indexed(name, index)) if name == "steps" => {
                job.steps.get(*index).ok_or_else(|| {
                    PathError::InvalidPath(format!(
                        "step index {index} out of bounds in job `{}`",
                        job.id
                    ))
                })?
            }
            Some(Segment::Name(name)) if name == "steps" => {
                let id = match cursor.next() {
                    Some(Segment::Name(id)) => id,
                    _ => {
                        return Err(PathError::InvalidPath(
                            "expected a step identifier after `steps`".into(),
                        ))
                    }
                };
                job.steps
                    .iter()
                    .find(|s| s.id == *id)
                    .ok_or_else(|| {
                        PathError::InvalidPath(format!("unknown step `{id}` in job `{}`", job.id))
                    })?
            }
            Some(other) => {
                return Err(PathError::InvalidPath(format!(
                    "unexpected segment after a job: {other:?}"
                )))
            }
        };

        match cursor.next() {
            None => Ok(PathValue::Step(step.clone())),
            Some(Segment::Name(name)) if name == "results" => {
                finish(cursor, PathValue::Results(step.results.clone()))
            }
            Some(Segment::Name(name)) if name == "formData" => {
                finish(cursor, PathValue::FormData(step.form_data.clone()))
            }
            Some(other) => Err(PathError::InvalidPath(format!(
                "unexpected segment after a step: {other:?}"
            ))),
        }
    }
}

fn finish<'a>(
    mut cursor: impl Iterator<Item = &'a Segment>,
    value: PathValue,
) -> Result<PathValue, PathError> {
    match cursor.next() {
        None => Ok(value),
        Some(extra) => Err(PathError::InvalidPath(format!(
            "trailing segment: {extra:?}"
        ))),
    }
}
