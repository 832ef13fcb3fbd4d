//! The execution trace graph.
//!
//! Every task owns one [`TraceNode`], created with the task and stamped as
//! it executes. Combinators link nodes with one-directional edges (from the
//! composing task down to the tasks it composed over), so the graph is a
//! DAG of shared nodes: a node may be reachable through several
//! relationships but is counted once.
//!
//! The graph rooted at a task can keep growing after that task is terminal,
//! e.g. when a fire-and-forget side effect attaches its subtree, so
//! [`count_tasks`] always walks the live graph as of the call.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a parent node relates to a linked child node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// This task caused the child to run.
    ParentOf,
    /// This task may cause the child to run but did not on this execution.
    PotentialParentOf,
    /// The child was triggered by this task but its completion is not
    /// required for this task's completion.
    PotentialChild,
}

/// The terminal outcome recorded on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Failure,
    Cancellation,
}

struct NodeData {
    started: Option<Instant>,
    ended: Option<Instant>,
    kind: Option<ResultKind>,
    preview: Option<String>,
    edges: Vec<(Relation, Arc<TraceNode>)>,
}

/// Diagnostic record of one task's identity, timing, and outcome.
pub struct TraceNode {
    id: u64,
    name: String,
    data: Mutex<NodeData>,
}

impl TraceNode {
    pub(crate) fn new(id: u64, name: &str) -> Arc<Self> {
        Arc::new(TraceNode {
            id,
            name: name.to_owned(),
            data: Mutex::new(NodeData {
                started: None,
                ended: None,
                kind: None,
                preview: None,
                edges: Vec::new(),
            }),
        })
    }

    /// The task id this node records.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The task name this node records.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mark_started(&self) {
        let mut data = self.lock();
        if data.started.is_none() {
            data.started = Some(Instant::now());
        }
    }

    /// Stamps the terminal outcome. The first stamp wins; the node is
    /// immutable afterwards.
    pub(crate) fn mark_finished(&self, kind: ResultKind, preview: Option<String>) {
        let mut data = self.lock();
        if data.kind.is_some() {
            return;
        }
        data.kind = Some(kind);
        data.preview = preview;
        data.ended = Some(Instant::now());
    }

    pub(crate) fn add_edge(&self, relation: Relation, node: &Arc<TraceNode>) {
        self.lock().edges.push((relation, Arc::clone(node)));
    }

    /// Upgrades a `PotentialParentOf` edge to `ParentOf` once the child
    /// actually ran on behalf of this task.
    pub(crate) fn promote(&self, child_id: u64) {
        let mut data = self.lock();
        for (relation, node) in &mut data.edges {
            if node.id == child_id && *relation == Relation::PotentialParentOf {
                *relation = Relation::ParentOf;
            }
        }
    }

    /// Snapshot of this node's outgoing edges, in the order they were added.
    pub fn edges(&self) -> Vec<(Relation, Arc<TraceNode>)> {
        self.lock().edges.clone()
    }

    /// The recorded terminal outcome, if the task finished.
    pub fn result_kind(&self) -> Option<ResultKind> {
        self.lock().kind
    }

    /// Short textual preview of the outcome (error or cancellation message).
    pub fn value_preview(&self) -> Option<String> {
        self.lock().preview.clone()
    }

    /// Wall-clock duration between start and finish, once both are stamped.
    pub fn duration(&self) -> Option<Duration> {
        let data = self.lock();
        match (data.started, data.ended) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    /// True once execution of the task has begun.
    pub fn started(&self) -> bool {
        self.lock().started.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeData> {
        self.data.lock().expect("trace node poisoned")
    }
}

impl std::fmt::Debug for TraceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.lock();
        f.debug_struct("TraceNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &data.kind)
            .field("edges", &data.edges.len())
            .finish()
    }
}

/// A trace graph snapshot rooted at one task's node.
#[derive(Clone, Debug)]
pub struct Trace {
    root: Arc<TraceNode>,
}

impl Trace {
    pub(crate) fn new(root: Arc<TraceNode>) -> Self {
        Trace { root }
    }

    /// The node of the task this trace was taken from.
    pub fn root(&self) -> &Arc<TraceNode> {
        &self.root
    }

    /// Every distinct node reachable from the root, each exactly once, in
    /// breadth-first discovery order.
    pub fn nodes(&self) -> Vec<Arc<TraceNode>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([Arc::clone(&self.root)]);
        let mut nodes = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.id) {
                continue;
            }
            for (_, child) in node.edges() {
                queue.push_back(child);
            }
            nodes.push(node);
        }
        nodes
    }
}

/// Number of distinct trace nodes reachable from the trace's root.
pub fn count_tasks(trace: &Trace) -> usize {
    trace.nodes().len()
}
