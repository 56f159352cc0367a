//! Arena-backed graph storage.
//!
//! Nodes live in a single `Vec`; edges are index lists on each node. This
//! avoids cyclic ownership between parents and children and keeps lookup by
//! identifier O(1) through a side table. Two indices are reserved: the
//! synthetic root (workflow `setup` scripts promoted to steps) and the
//! synthetic tail (`teardown` scripts). Neither is ever reported as a job.

use rustc_hash::FxHashMap;

use crate::document::{GlobalConfig, Job, LifecycleEvent, Permission, Workflow};

/// Index of a node within the graph arena.
pub type NodeIndex = usize;

/// Arena index of the synthetic root node.
pub const ROOT: NodeIndex = 0;
/// Arena index of the synthetic tail node.
pub const TAIL: NodeIndex = 1;

/// Reserved identifier of the synthetic root node.
pub const ROOT_ID: &str = "root";
/// Reserved identifier of the synthetic tail node.
pub const TAIL_ID: &str = "tail";

/// A DAG vertex wrapping a job, with parent and child edges.
#[derive(Clone, Debug)]
pub struct GraphNode {
    pub id: String,
    /// The wrapped job; mutated during execution as results arrive.
    pub job: Job,
    /// Incoming edges: nodes that must complete before this one starts.
    pub parents: Vec<NodeIndex>,
    /// Outgoing edges.
    pub children: Vec<NodeIndex>,
}

impl GraphNode {
    fn new(id: impl Into<String>, job: Job) -> Self {
        Self {
            id: id.into(),
            job,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Workflow-level fields carried through the graph for projection.
#[derive(Clone, Debug, Default)]
pub(crate) struct GraphMeta {
    pub global_config: Option<GlobalConfig>,
    pub permissions: Vec<Permission>,
    pub environment: FxHashMap<String, String>,
    /// Workflow-scoped lifecycle events that were not promoted into the
    /// root or tail (phases outside setup/teardown; stored, never run).
    pub retained_lifecycle: Vec<LifecycleEvent>,
}

/// The mutable execution graph built once per `execute()` call.
#[derive(Clone, Debug)]
pub struct WorkflowGraph {
    nodes: Vec<GraphNode>,
    index: FxHashMap<String, NodeIndex>,
    /// Real jobs in declaration order, for projection and indexed lookup.
    job_order: Vec<NodeIndex>,
    pub(crate) meta: GraphMeta,
}

impl WorkflowGraph {
    pub(crate) fn new(workflow: &Workflow) -> Self {
        let meta = GraphMeta {
            global_config: workflow.global_config.clone(),
            permissions: workflow.permissions.clone(),
            environment: workflow.environment.clone(),
            retained_lifecycle: Vec::new(),
        };
        let mut index = FxHashMap::default();
        index.insert(ROOT_ID.to_string(), ROOT);
        index.insert(TAIL_ID.to_string(), TAIL);
        Self {
            nodes: vec![
                GraphNode::new(ROOT_ID, Job::new(ROOT_ID)),
                GraphNode::new(TAIL_ID, Job::new(TAIL_ID)),
            ],
            index,
            job_order: Vec::new(),
            meta,
        }
    }

    /// Insert a job node. Returns `None` when the identifier is taken
    /// (including the reserved `root`/`tail` names).
    pub(crate) fn insert(&mut self, job: Job) -> Option<NodeIndex> {
        if self.index.contains_key(&job.id) {
            return None;
        }
        let idx = self.nodes.len();
        self.index.insert(job.id.clone(), idx);
        self.nodes.push(GraphNode::new(job.id.clone(), job));
        self.job_order.push(idx);
        Some(idx)
    }

    pub(crate) fn add_edge(&mut self, parent: NodeIndex, child: NodeIndex) {
        if !self.nodes[parent].children.contains(&child) {
            self.nodes[parent].children.push(child);
        }
        if !self.nodes[child].parents.contains(&parent) {
            self.nodes[child].parents.push(parent);
        }
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.nodes[idx]
    }

    pub(crate) fn node_mut(&mut self, idx: NodeIndex) -> &mut GraphNode {
        &mut self.nodes[idx]
    }

    /// Number of nodes including root and tail.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Real jobs (root and tail excluded) in declaration order.
    pub fn job_order(&self) -> &[NodeIndex] {
        &self.job_order
    }

    pub fn children(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.nodes[idx].children
    }

    pub fn parents(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.nodes[idx].parents
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> {
        self.nodes.iter().enumerate()
    }
}
