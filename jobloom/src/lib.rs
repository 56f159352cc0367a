//! ```text
//! Workflow document ──► build_graph ──► WorkflowEngine::execute
//!                        │                  │
//!                        │                  ├─► Scheduler ─► node tasks ─► ScriptExecutors
//!                        │                  │                              (shell / template / injected)
//!                        │                  ├─► FormBroker (rendezvous for form data)
//!                        │                  └─► Aggregator ─► snapshot + event pairs
//!                        │
//!                        └─► root/tail synthesis, cycle detection, lifecycle promotion
//! ```
//!
//! Jobloom runs a declarative workflow whose jobs form a directed acyclic
//! graph. Jobs execute in parallel as their dependencies complete; the steps
//! inside a job run sequentially, wrapped by lifecycle hooks. Every executor
//! event is routed back onto the owning step, and each event is delivered to
//! the caller together with a fresh snapshot of the whole workflow.

pub mod document;
pub mod engine;
pub mod events;
pub mod executors;
pub mod graph;
pub mod repository;
pub mod status;
