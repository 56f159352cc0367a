//! The execution graph: arena-backed nodes, DAG construction, job
//! expansion, snapshot projection, and path lookup.

pub mod builder;
pub mod expand;
pub mod node;
pub mod path;
pub mod project;

pub use builder::{build_graph, GraphError};
pub use expand::{expand_job, ExpandedScript};
pub use node::{GraphNode, NodeIndex, WorkflowGraph, ROOT, ROOT_ID, TAIL, TAIL_ID};
pub use path::{PathError, PathValue};
