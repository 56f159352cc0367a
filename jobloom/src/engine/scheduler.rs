//! The graph scheduler.
//!
//! One orchestrator task owns the graph and the ready/in-progress/completed
//! bookkeeping; each executing node runs in its own task and talks back over
//! a single signal channel. A node becomes ready only when every parent has
//! completed, so cross-node ordering follows the dependency edges and
//! nothing else. Within a node, scripts run strictly in expansion order.
//!
//! On failure the orchestrator marks the failing slot, flips the
//! cancellation watch, aborts the other node tasks, and terminates the
//! outer stream with the error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::{FormMap, Job, Script};
use crate::events::{EventEmitter, FormRequest, NodeFailure, ResultEvent, Signal};
use crate::executors::{
    ExecutorContext, ExecutorError, ScriptExecutor, ShellExecutor, TemplateExecutor,
};
use crate::graph::{expand_job, NodeIndex, WorkflowGraph, ROOT};
use crate::repository::RepositorySource;

use super::rendezvous::FormBroker;
use super::stream::{ExecutionStream, StreamItem};
use super::FormHandler;

/// Shared, read-only execution environment handed to every node task.
pub(crate) struct ExecutionConfig {
    pub working_dir: std::path::PathBuf,
    pub base_environment: FxHashMap<String, String>,
    pub repository: Option<Arc<dyn RepositorySource>>,
    pub repository_path: Option<String>,
    pub form_handler: Option<Arc<dyn FormHandler>>,
    pub javascript: Option<Arc<dyn ScriptExecutor>>,
    pub broker: Arc<FormBroker>,
    pub sequence: AtomicU64,
    pub template: TemplateExecutor,
}

impl ExecutionConfig {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Capacity of the outer stream channel; bounds how far producers can run
/// ahead of a slow consumer.
const STREAM_CAPACITY: usize = 64;

/// Start executing a built graph; the caller drains the returned stream.
pub(crate) fn spawn_execution(
    graph: Arc<Mutex<Option<WorkflowGraph>>>,
    config: Arc<ExecutionConfig>,
) -> ExecutionStream {
    let (out_tx, out_rx) = flume::bounded::<StreamItem>(STREAM_CAPACITY);
    tokio::spawn(orchestrate(graph, config, out_tx));
    ExecutionStream::new(out_rx)
}

async fn orchestrate(
    graph: Arc<Mutex<Option<WorkflowGraph>>>,
    config: Arc<ExecutionConfig>,
    out_tx: flume::Sender<StreamItem>,
) {
    let (sig_tx, sig_rx) = flume::unbounded::<Signal>();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let total = graph
        .lock()
        .as_ref()
        .expect("graph installed before execution")
        .node_count();
    let mut completed: FxHashSet<NodeIndex> = FxHashSet::default();
    let mut scheduled: FxHashSet<NodeIndex> = FxHashSet::default();
    let mut running: FxHashMap<NodeIndex, JoinHandle<()>> = FxHashMap::default();

    // The root has no parents and is ready immediately.
    launch(
        ROOT, &graph, &config, &sig_tx, &cancel_rx, &mut scheduled, &mut running,
    );

    loop {
        let Ok(signal) = sig_rx.recv_async().await else {
            warn!("signal channel closed with nodes outstanding");
            break;
        };
        match signal {
            Signal::ScriptStarted { node, script_id } => {
                let mut guard = graph.lock();
                if let Some(graph) = guard.as_mut() {
                    super::aggregate::begin_script(graph, node, &script_id, Utc::now());
                }
            }
            Signal::Emitted { node, event } => {
                let snapshot = {
                    let mut guard = graph.lock();
                    let graph = guard.as_mut().expect("graph installed before execution");
                    super::aggregate::route_event(graph, node, &event, Utc::now());
                    graph.project()
                };
                if out_tx.send_async(Ok((snapshot, event))).await.is_err() {
                    // The caller dropped the stream: tear everything down.
                    debug!("stream dropped; cancelling execution");
                    let _ = cancel_tx.send(true);
                    for (_, handle) in running.drain() {
                        handle.abort();
                    }
                    break;
                }
            }
            Signal::FormAccepted { node, step_id, data } => {
                let mut guard = graph.lock();
                if let Some(graph) = guard.as_mut() {
                    super::aggregate::store_form_data(graph, node, step_id.as_deref(), data);
                }
            }
            Signal::Finished { node, outcome } => {
                running.remove(&node);
                match outcome {
                    Ok(()) => {
                        completed.insert(node);
                        debug!(node, done = completed.len(), total, "node completed");
                        if completed.len() == total {
                            break;
                        }
                        let (children, parent_sets) = {
                            let guard = graph.lock();
                            let graph = guard.as_ref().expect("graph installed before execution");
                            let children = graph.children(node).to_vec();
                            let parents: Vec<Vec<NodeIndex>> = children
                                .iter()
                                .map(|&c| graph.parents(c).to_vec())
                                .collect();
                            (children, parents)
                        };
                        for (child, parents) in children.into_iter().zip(parent_sets) {
                            if scheduled.contains(&child) {
                                continue;
                            }
                            if parents.iter().all(|p| completed.contains(p)) {
                                launch(
                                    child, &graph, &config, &sig_tx, &cancel_rx, &mut scheduled,
                                    &mut running,
                                );
                            }
                        }
                    }
                    Err(failure) => {
                        {
                            let mut guard = graph.lock();
                            if let Some(graph) = guard.as_mut() {
                                super::aggregate::fail_script(
                                    graph,
                                    node,
                                    &failure.script_id,
                                    Utc::now(),
                                );
                            }
                        }
                        let _ = cancel_tx.send(true);
                        for (_, handle) in running.drain() {
                            handle.abort();
                        }
                        let _ = out_tx.send_async(Err(failure.error.into())).await;
                        break;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn launch(
    node: NodeIndex,
    graph: &Arc<Mutex<Option<WorkflowGraph>>>,
    config: &Arc<ExecutionConfig>,
    sig_tx: &flume::Sender<Signal>,
    cancel_rx: &watch::Receiver<bool>,
    scheduled: &mut FxHashSet<NodeIndex>,
    running: &mut FxHashMap<NodeIndex, JoinHandle<()>>,
) {
    scheduled.insert(node);
    let job = graph
        .lock()
        .as_ref()
        .expect("graph installed before execution")
        .node(node)
        .job
        .clone();
    debug!(node, job = %job.id, "node ready");
    let handle = tokio::spawn(run_node(
        node,
        job,
        config.clone(),
        sig_tx.clone(),
        cancel_rx.clone(),
    ));
    running.insert(node, handle);
}

async fn run_node(
    node: NodeIndex,
    job: Job,
    config: Arc<ExecutionConfig>,
    signals: flume::Sender<Signal>,
    cancel: watch::Receiver<bool>,
) {
    let outcome = execute_node(node, &job, &config, &signals, &cancel).await;
    let _ = signals.send(Signal::Finished { node, outcome });
}

async fn execute_node(
    node: NodeIndex,
    job: &Job,
    config: &Arc<ExecutionConfig>,
    signals: &flume::Sender<Signal>,
    cancel: &watch::Receiver<bool>,
) -> Result<(), NodeFailure> {
    // Job-level form data gates the whole job.
    let mut job_form = FormMap::default();
    if let Some(schema) = &job.form {
        let unique_id = format!("job_{}_{}", job.id, config.next_sequence());
        let data = request_form(node, job.id.clone(), unique_id, schema.clone(), config, signals)
            .await
            .map_err(|error| NodeFailure {
                script_id: job.id.clone(),
                error,
            })?;
        let _ = signals.send(Signal::FormAccepted {
            node,
            step_id: None,
            data: data.clone(),
        });
        job_form = data;
    }

    // Step-level form data is requested when the step's first script comes
    // up, and scopes to that step's scripts only.
    let mut step_forms: FxHashMap<String, FormMap> = FxHashMap::default();

    for entry in expand_job(job) {
        if let Some(step_id) = &entry.step_id {
            if !step_forms.contains_key(step_id) {
                let step = job
                    .steps
                    .iter()
                    .find(|s| &s.id == step_id)
                    .expect("expansion only names the job's own steps");
                let mut data = FormMap::default();
                if let Some(schema) = &step.form {
                    let unique_id = format!("step_{}_{}", step.id, config.next_sequence());
                    let script_id = step.script.id().to_string();
                    data = request_form(
                        node,
                        script_id.clone(),
                        unique_id,
                        schema.clone(),
                        config,
                        signals,
                    )
                    .await
                    .map_err(|error| NodeFailure { script_id, error })?;
                    let _ = signals.send(Signal::FormAccepted {
                        node,
                        step_id: Some(step.id.clone()),
                        data: data.clone(),
                    });
                }
                step_forms.insert(step_id.clone(), data);
            }
        }

        let mut form_data = job_form.clone();
        if let Some(step_id) = &entry.step_id {
            form_data.extend(step_forms[step_id].clone());
        }

        let script_id = entry.script.id().to_string();
        let _ = signals.send(Signal::ScriptStarted {
            node,
            script_id: script_id.clone(),
        });

        let mut environment = config.base_environment.clone();
        environment.extend(job.environment.clone());
        let ctx = ExecutorContext {
            working_dir: config.working_dir.clone(),
            environment,
            form_data,
            repository: config.repository.clone(),
            repository_path: config.repository_path.clone(),
            emitter: EventEmitter::new(node, signals.clone()),
            cancel: cancel.clone(),
        };

        let result = match &entry.script {
            Script::Bash { .. } => ShellExecutor.execute(&entry.script, ctx).await,
            Script::Template { .. } => config.template.execute(&entry.script, ctx).await,
            Script::Javascript { .. } => match &config.javascript {
                Some(executor) => executor.execute(&entry.script, ctx).await,
                None => Err(ExecutorError::UnsupportedScriptType("javascript")),
            },
        };

        match result {
            Ok(()) => {
                let _ = signals.send(Signal::Emitted {
                    node,
                    event: ResultEvent::boundary(&script_id),
                });
            }
            Err(error) => return Err(NodeFailure { script_id, error }),
        }
    }
    Ok(())
}

/// Publish a form request and suspend until data arrives, either through
/// the configured handler or the external rendezvous.
async fn request_form(
    node: NodeIndex,
    script_id: String,
    unique_id: String,
    schema: serde_json::Value,
    config: &Arc<ExecutionConfig>,
    signals: &flume::Sender<Signal>,
) -> Result<FormMap, ExecutorError> {
    let request = FormRequest {
        script_id,
        unique_id: unique_id.clone(),
        schema,
    };
    let _ = signals.send(Signal::Emitted {
        node,
        event: ResultEvent::Form(request.clone()),
    });
    match &config.form_handler {
        Some(handler) => handler.on_form_request(&request).await,
        None => config.broker.wait(&unique_id).await.ok_or_else(|| {
            ExecutorError::ExecutionFailed(format!("form rendezvous {unique_id} was not fulfilled"))
        }),
    }
}
