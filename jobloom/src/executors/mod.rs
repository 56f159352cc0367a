//! Script executors.
//!
//! Every script kind runs behind the same [`ScriptExecutor`] contract: the
//! executor receives the script and an [`ExecutorContext`], pushes
//! [`ResultEvent`](crate::events::ResultEvent)s through the context's
//! emitter as work progresses, and returns `Ok` or the error that fails the
//! sequence. The emitter's channel is drained exactly once, by the engine's
//! orchestrator; cancellation arrives through the context's watch receiver
//! and must interrupt ongoing work (process kill, request abort).
//!
//! The crate ships the shell and template executors. A JavaScript executor
//! is an external collaborator: inject one through
//! [`WorkflowEngineBuilder::javascript_executor`](crate::engine::WorkflowEngineBuilder::javascript_executor),
//! otherwise javascript steps fail with [`ExecutorError::UnsupportedScriptType`].

pub mod shell;
pub mod template;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;

use crate::document::{FormMap, Script};
use crate::events::EventEmitter;
use crate::repository::{RepositoryError, RepositorySource};

pub use shell::ShellExecutor;
pub use template::TemplateExecutor;

/// Errors produced while executing a script.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("command exited with status {code}:\n{tail}")]
    #[diagnostic(
        code(jobloom::executor::command_failed),
        help("The tail of the command's combined output is included above.")
    )]
    CommandFailed { code: i32, tail: String },

    #[error("process failed: {0}")]
    #[diagnostic(code(jobloom::executor::process_failed))]
    ProcessFailed(String),

    #[error("template source not found: {0}")]
    #[diagnostic(code(jobloom::executor::template_file_not_found))]
    TemplateFileNotFound(String),

    #[error("template source is not a fetchable url: {0}")]
    #[diagnostic(code(jobloom::executor::template_invalid_url))]
    TemplateInvalidUrl(String),

    #[error("template {file} failed to render: {reason}")]
    #[diagnostic(code(jobloom::executor::template_invalid))]
    TemplateInvalid { file: String, reason: String },

    #[error("no executor available for {0} scripts")]
    #[diagnostic(
        code(jobloom::executor::unsupported_script_type),
        help("Javascript execution requires an injected executor.")
    )]
    UnsupportedScriptType(&'static str),

    #[error(transparent)]
    #[diagnostic(code(jobloom::executor::repository))]
    Repository(#[from] RepositoryError),

    #[error("execution failed: {0}")]
    #[diagnostic(code(jobloom::executor::execution_failed))]
    ExecutionFailed(String),
}

/// Everything a script executor needs for one run.
#[derive(Clone)]
pub struct ExecutorContext {
    /// Directory the script runs in and output paths resolve against.
    pub working_dir: PathBuf,
    /// Job environment overlaid on the inherited process environment.
    pub environment: FxHashMap<String, String>,
    /// Form data visible to this script (job-level merged with step-level).
    pub form_data: FormMap,
    /// Source for template files, when configured.
    pub repository: Option<Arc<dyn RepositorySource>>,
    /// Sub-path within the repository for template resolution.
    pub repository_path: Option<String>,
    /// Where the executor's result events go.
    pub emitter: EventEmitter,
    /// Flips to `true` when execution is being torn down. A closed channel
    /// means the engine is gone and counts as cancellation too.
    pub cancel: watch::Receiver<bool>,
}

impl ExecutorContext {
    /// Whether cancellation has been requested (or the engine is gone).
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }
}

/// The uniform contract all script kinds run behind.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script: &Script, ctx: ExecutorContext) -> Result<(), ExecutorError>;
}
