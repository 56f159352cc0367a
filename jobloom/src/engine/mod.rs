//! The workflow engine.
//!
//! [`WorkflowEngine`] wraps one workflow document and executes it once:
//! `execute()` builds the dependency graph (aborting on structural errors
//! before any event is emitted), then streams `(snapshot, event)` pairs
//! while jobs run. The engine stays usable alongside and after the stream
//! for path [`lookup`](WorkflowEngine::lookup), snapshots, and the form
//! rendezvous surface.

pub(crate) mod aggregate;
pub mod rendezvous;
pub mod scheduler;
pub mod stream;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::instrument;

use crate::document::{DocumentError, FormMap, Workflow};
use crate::events::FormRequest;
use crate::executors::{ExecutorError, ScriptExecutor, TemplateExecutor};
use crate::graph::{build_graph, GraphError, PathError, PathValue, WorkflowGraph, ROOT};
use crate::repository::{RepositoryError, RepositorySource};

pub use rendezvous::FormBroker;
pub use stream::{ExecutionStream, StreamItem};

use scheduler::ExecutionConfig;

/// The error type crossing the engine boundary.
///
/// Never thrown across the stream as a panic; a failing execution delivers
/// one terminal `Err` item and ends.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repository(#[from] RepositoryError),

    #[error("execution failed: {0}")]
    #[diagnostic(code(jobloom::engine::execution_failed))]
    ExecutionFailed(String),
}

/// Callback surface for form requests.
///
/// When a handler is configured the scheduler awaits it instead of the
/// external `provide_form_data` rendezvous; the `formRequest` event is
/// still emitted and routed.
#[async_trait]
pub trait FormHandler: Send + Sync {
    async fn on_form_request(&self, request: &FormRequest) -> Result<FormMap, ExecutorError>;
}

/// Executes one workflow document.
pub struct WorkflowEngine {
    workflow: Workflow,
    config: Arc<ExecutionConfig>,
    graph: Arc<Mutex<Option<WorkflowGraph>>>,
    broker: Arc<FormBroker>,
    executed: AtomicBool,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    workflow: Workflow,
    working_dir: Option<PathBuf>,
    repository: Option<Arc<dyn RepositorySource>>,
    repository_path: Option<String>,
    form_handler: Option<Arc<dyn FormHandler>>,
    javascript: Option<Arc<dyn ScriptExecutor>>,
}

impl WorkflowEngineBuilder {
    /// Directory scripts run in; defaults to the process working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Source for template files, with an optional sub-path. Without an
    /// explicit sub-path the workflow's `globalConfig.templatePath` applies.
    #[must_use]
    pub fn repository(
        mut self,
        source: Arc<dyn RepositorySource>,
        path: Option<impl Into<String>>,
    ) -> Self {
        self.repository = Some(source);
        self.repository_path = path.map(Into::into);
        self
    }

    /// Answer form requests through a callback instead of the external
    /// rendezvous.
    #[must_use]
    pub fn form_handler(mut self, handler: Arc<dyn FormHandler>) -> Self {
        self.form_handler = Some(handler);
        self
    }

    /// Executor for javascript scripts. Without one, javascript steps fail
    /// with `UnsupportedScriptType`.
    #[must_use]
    pub fn javascript_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.javascript = Some(executor);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let broker = Arc::new(FormBroker::new());
        let repository_path = self.repository_path.or_else(|| {
            self.workflow
                .global_config
                .as_ref()
                .and_then(|c| c.template_path.clone())
        });
        let config = Arc::new(ExecutionConfig {
            working_dir: self
                .working_dir
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from(".")),
            base_environment: self.workflow.environment.clone(),
            repository: self.repository,
            repository_path,
            form_handler: self.form_handler,
            javascript: self.javascript,
            broker: broker.clone(),
            sequence: AtomicU64::new(0),
            template: TemplateExecutor::new(),
        });
        WorkflowEngine {
            workflow: self.workflow,
            config,
            graph: Arc::new(Mutex::new(None)),
            broker,
            executed: AtomicBool::new(false),
        }
    }
}

impl WorkflowEngine {
    pub fn builder(workflow: Workflow) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            workflow,
            working_dir: None,
            repository: None,
            repository_path: None,
            form_handler: None,
            javascript: None,
        }
    }

    /// An engine with default configuration.
    pub fn new(workflow: Workflow) -> Self {
        Self::builder(workflow).build()
    }

    /// Build the graph and start executing.
    ///
    /// Structural errors (duplicate ids, missing dependencies, cycles)
    /// abort here, before any event is emitted. The returned stream yields
    /// `(snapshot, event)` pairs until the workflow completes or a script
    /// fails; dropping it cancels the execution.
    #[instrument(skip(self), fields(jobs = self.workflow.jobs.len()))]
    pub fn execute(&self) -> Result<ExecutionStream, EngineError> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ExecutionFailed(
                "execute() may only be called once per engine".into(),
            ));
        }
        let graph = build_graph(&self.workflow)?;
        if !graph.parents(ROOT).is_empty() {
            return Err(GraphError::NotRootNode.into());
        }
        *self.graph.lock() = Some(graph);
        Ok(scheduler::spawn_execution(
            self.graph.clone(),
            self.config.clone(),
        ))
    }

    /// Deliver form data for a rendezvous id received in a `formRequest`
    /// event. Data arriving before the waiting side is buffered; a second
    /// delivery for the same id is ignored (returns `false`).
    #[instrument(skip(self, data))]
    pub fn provide_form_data(&self, unique_id: &str, data: FormMap) -> bool {
        self.broker.provide(unique_id, data)
    }

    /// Wait for form data for a rendezvous id. At most one waiter per id
    /// receives the data; `None` when the id was already consumed.
    pub async fn wait_for_form_data(&self, unique_id: &str) -> Option<FormMap> {
        self.broker.wait(unique_id).await
    }

    /// Resolve a dotted path (`jobs.build.steps[0].results`) against the
    /// live graph.
    pub fn lookup(&self, path: &str) -> Result<PathValue, EngineError> {
        let guard = self.graph.lock();
        match guard.as_ref() {
            Some(graph) => graph.lookup(path).map_err(Into::into),
            None => Err(PathError::InvalidPath("workflow has not started".into()).into()),
        }
    }

    /// The current workflow snapshot; `None` before `execute()`.
    pub fn snapshot(&self) -> Option<Workflow> {
        self.graph.lock().as_ref().map(WorkflowGraph::project)
    }

    /// The document this engine was built from.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}
