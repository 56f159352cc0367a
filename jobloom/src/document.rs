//! The declarative workflow document.
//!
//! This module defines the in-memory shape of a workflow: the top-level
//! [`Workflow`] container, its [`Job`]s, their [`Step`]s, the [`Script`]
//! each step runs, and the [`LifecycleEvent`] hooks that wrap jobs and
//! steps. The same types double as the execution state (steps accumulate
//! [`ResultEvent`]s and a [`RunningStatus`] while the engine runs) and as
//! the snapshot shape delivered alongside every event.
//!
//! Documents decode from YAML or JSON through serde; identifiers missing
//! from the document are filled with fresh UUIDs at decode time.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::events::ResultEvent;
use crate::status::{aggregate, RunningStatus};

/// Form data exchanged through the rendezvous protocol: field name to value.
pub type FormMap = FxHashMap<String, Value>;

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Errors produced while decoding a workflow document.
#[derive(Debug, Error, Diagnostic)]
pub enum DocumentError {
    #[error("failed to parse workflow document: {0}")]
    #[diagnostic(
        code(jobloom::document::parsing_failed),
        help("Check the document against the workflow schema: jobs, steps, and scripts.")
    )]
    ParsingFailed(String),
}

/// The complete declarative document the engine runs.
///
/// A workflow carries optional global configuration, a declared permission
/// list (stored and surfaced, never enforced), workflow-scoped lifecycle
/// events (`setup` and `teardown`), an environment overlay, and the jobs
/// forming the dependency graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    #[serde(default, rename = "globalConfig", skip_serializing_if = "Option::is_none")]
    pub global_config: Option<GlobalConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub environment: FxHashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle: Vec<LifecycleEvent>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Workflow {
    /// Decode a workflow from a YAML document.
    pub fn from_yaml(input: &str) -> Result<Self, DocumentError> {
        serde_yaml::from_str(input).map_err(|e| DocumentError::ParsingFailed(e.to_string()))
    }

    /// Decode a workflow from a JSON document.
    pub fn from_json(input: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(input).map_err(|e| DocumentError::ParsingFailed(e.to_string()))
    }

    #[must_use]
    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    #[must_use]
    pub fn with_lifecycle(mut self, event: LifecycleEvent) -> Self {
        self.lifecycle.push(event);
        self
    }

    /// The workflow's derived status: the aggregation of its jobs'
    /// statuses. An empty workflow is not started.
    pub fn status(&self) -> RunningStatus {
        let jobs: Vec<RunningStatus> = self.jobs.iter().map(Job::status).collect();
        aggregate(&jobs)
    }
}

/// Workflow-wide configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Repository sub-path searched for template sources.
    #[serde(default, rename = "templatePath", skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
}

/// A capability declared by the document author.
///
/// Permissions are carried through parsing and projection verbatim; the
/// engine does not enforce them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    ReadFile,
    WriteFile,
    RunCommand,
    RunScript,
    DeleteFile,
    ReadDirectory,
    WriteDirectory,
    DeleteDirectory,
    ReadEnvironmentVariable,
    WriteEnvironmentVariable,
    ReadSecret,
    WriteSecret,
    ReadVariable,
    WriteVariable,
}

/// One unit of the dependency graph: an ordered list of steps plus the
/// job-scoped lifecycle hooks that wrap them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Job {
    #[serde(default = "fresh_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Identifiers of jobs that must complete before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub environment: FxHashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle: Vec<LifecycleEvent>,
    /// JSON schema describing the form data this job requests before it runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Value>,
    /// The last form map accepted for this job; empty until one is provided.
    #[serde(default, rename = "formData", skip_serializing_if = "FxHashMap::is_empty")]
    pub form_data: FormMap,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            steps: Vec::new(),
            needs: Vec::new(),
            environment: FxHashMap::default(),
            lifecycle: Vec::new(),
            form: None,
            form_data: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_needs(mut self, needs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.needs.extend(needs.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_lifecycle(mut self, event: LifecycleEvent) -> Self {
        self.lifecycle.push(event);
        self
    }

    #[must_use]
    pub fn with_form(mut self, schema: Value) -> Self {
        self.form = Some(schema);
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// The job's derived status: the aggregation over its steps and its
    /// job-scoped lifecycle events. A job with neither is not started.
    pub fn status(&self) -> RunningStatus {
        let parts = self
            .steps
            .iter()
            .map(|s| &s.status)
            .chain(self.lifecycle.iter().map(|e| &e.status));
        aggregate(parts)
    }
}

/// A single script invocation within a job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Step {
    #[serde(default = "fresh_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON schema describing form data requested before this step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Value>,
    /// Conditional expression, stored verbatim and not evaluated.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub script: Script,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle: Vec<LifecycleEvent>,
    /// Append-only log of events this step's scripts have produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultEvent>,
    #[serde(default)]
    pub status: RunningStatus,
    #[serde(default, rename = "formData", skip_serializing_if = "FxHashMap::is_empty")]
    pub form_data: FormMap,
}

impl Step {
    pub fn new(script: Script) -> Self {
        Self {
            id: fresh_id(),
            name: None,
            form: None,
            condition: None,
            script,
            lifecycle: Vec::new(),
            results: Vec::new(),
            status: RunningStatus::default(),
            form_data: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_form(mut self, schema: Value) -> Self {
        self.form = Some(schema);
        self
    }

    #[must_use]
    pub fn with_lifecycle(mut self, event: LifecycleEvent) -> Self {
        self.lifecycle.push(event);
        self
    }
}

/// The executable unit a step or lifecycle event runs.
///
/// Every script carries its own identifier so result events can be routed
/// back to the slot that produced them. Documents do not usually spell the
/// identifier out (it is generated at decode time and serialized as
/// `scriptId`, distinct from the owning step's `id`).
/// [`Script::clone_with_id`] supports the lifecycle-hook expansion, which
/// re-tags a hook's script with the owning lifecycle event's identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Script {
    /// A shell command, run through a login shell.
    Bash {
        #[serde(default = "fresh_id", rename = "scriptId")]
        id: String,
        command: String,
    },
    /// An ordered list of template renders: source file to output path.
    Template {
        #[serde(default = "fresh_id", rename = "scriptId")]
        id: String,
        files: Vec<TemplateFile>,
    },
    /// A JavaScript source file, run by an injected executor.
    Javascript {
        #[serde(default = "fresh_id", rename = "scriptId")]
        id: String,
        file: String,
    },
}

impl Script {
    pub fn bash(command: impl Into<String>) -> Self {
        Script::Bash {
            id: fresh_id(),
            command: command.into(),
        }
    }

    pub fn template(files: Vec<TemplateFile>) -> Self {
        Script::Template {
            id: fresh_id(),
            files,
        }
    }

    pub fn javascript(file: impl Into<String>) -> Self {
        Script::Javascript {
            id: fresh_id(),
            file: file.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Script::Bash { id, .. } | Script::Template { id, .. } | Script::Javascript { id, .. } => {
                id
            }
        }
    }

    /// Clone this script under a different identifier.
    #[must_use]
    pub fn clone_with_id(&self, id: impl Into<String>) -> Self {
        let mut script = self.clone();
        match &mut script {
            Script::Bash { id: slot, .. }
            | Script::Template { id: slot, .. }
            | Script::Javascript { id: slot, .. } => *slot = id.into(),
        }
        script
    }
}

/// One template render: a source file reference and the path it writes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateFile {
    pub file: String,
    pub output: String,
}

/// A hook script bound to one phase of the workflow, job, or step lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    #[serde(default = "fresh_id")]
    pub id: String,
    #[serde(rename = "on")]
    pub phase: LifecyclePhase,
    #[serde(flatten)]
    pub script: Script,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultEvent>,
    #[serde(default)]
    pub status: RunningStatus,
}

impl LifecycleEvent {
    pub fn new(phase: LifecyclePhase, script: Script) -> Self {
        Self {
            id: fresh_id(),
            phase,
            script,
            results: Vec::new(),
            status: RunningStatus::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// The phases a lifecycle event can bind to, in execution order.
///
/// `Setup` and `Teardown` are meaningful at workflow scope, `BeforeJob` and
/// `AfterJob` at job scope, `BeforeStep` and `AfterStep` at step scope.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    Setup,
    BeforeJob,
    BeforeStep,
    AfterStep,
    AfterJob,
    Teardown,
}
