//! Static action flows.
//!
//! A flow is a small DAG of named actions stored in a petgraph `DiGraph`.
//! Each action has at most one success successor and at most one failure
//! successor. An action with no success successor is final; a failed action
//! with no failure successor ends the node-task.

pub mod consts;

use std::{collections::HashMap, fmt, sync::LazyLock};

use petgraph::{
    Direction,
    algo::is_cyclic_directed,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, EdgeRef},
};

use crate::{EdgeTaskError, Result, model::JobKind};

use consts::*;

/// Which outcome an edge is followed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum Branch {
    Success,
    Failure,
}

impl From<bool> for Branch {
    fn from(succ: bool) -> Self {
        if succ { Branch::Success } else { Branch::Failure }
    }
}

/// Immutable action DAG for one job kind.
#[derive(Debug)]
pub struct ActionFlow {
    graph: DiGraph<String, Branch>,
    first: NodeIndex,
}

/// A handle on one action of a flow.
#[derive(Clone, Copy)]
pub struct Action<'a> {
    flow: &'a ActionFlow,
    idx: NodeIndex,
}

static IMAGE_PRE_PULL_FLOW: LazyLock<ActionFlow> = LazyLock::new(|| {
    FlowBuilder::new(CHECK).success(CHECK, PULL).build().expect("image pre-pull flow is a valid DAG")
});

static NODE_UPGRADE_FLOW: LazyLock<ActionFlow> = LazyLock::new(|| {
    FlowBuilder::new(CHECK)
        .success(CHECK, WAIT_CONFIRM)
        .success(WAIT_CONFIRM, BACK_UP)
        .success(BACK_UP, UPGRADE)
        .failure(UPGRADE, ROLLBACK)
        .build()
        .expect("node upgrade flow is a valid DAG")
});

static CONFIG_UPDATE_FLOW: LazyLock<ActionFlow> = LazyLock::new(|| {
    FlowBuilder::new(CHECK)
        .success(CHECK, BACK_UP)
        .success(BACK_UP, UPDATE)
        .failure(UPDATE, ROLLBACK)
        .build()
        .expect("config update flow is a valid DAG")
});

impl ActionFlow {
    /// The process-wide flow for `kind`.
    pub fn for_kind(kind: JobKind) -> &'static ActionFlow {
        match kind {
            JobKind::ImagePrePull => &IMAGE_PRE_PULL_FLOW,
            JobKind::NodeUpgrade => &NODE_UPGRADE_FLOW,
            JobKind::ConfigUpdate => &CONFIG_UPDATE_FLOW,
        }
    }

    pub fn first(&self) -> Action<'_> {
        Action {
            flow: self,
            idx: self.first,
        }
    }

    /// Looks an action up by name with a DFS from the first action.
    pub fn find(
        &self,
        name: &str,
    ) -> Option<Action<'_>> {
        let mut dfs = Dfs::new(&self.graph, self.first);
        while let Some(idx) = dfs.next(&self.graph) {
            if self.graph[idx] == name {
                return Some(Action {
                    flow: self,
                    idx,
                });
            }
        }
        None
    }

    /// Like [`ActionFlow::find`], but an empty name resolves to the first action.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Option<Action<'_>> {
        if name.is_empty() { Some(self.first()) } else { self.find(name) }
    }

    /// All action names reachable from the first action, in DFS order.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut dfs = Dfs::new(&self.graph, self.first);
        while let Some(idx) = dfs.next(&self.graph) {
            names.push(self.graph[idx].as_str());
        }
        names
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn successor(
        &self,
        idx: NodeIndex,
        branch: Branch,
    ) -> Option<NodeIndex> {
        self.graph.edges_directed(idx, Direction::Outgoing).find(|e| *e.weight() == branch).map(|e| e.target())
    }
}

impl fmt::Display for ActionFlow {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut lines = Vec::new();
        let mut dfs = Dfs::new(&self.graph, self.first);
        while let Some(idx) = dfs.next(&self.graph) {
            let outgoing: Vec<String> = self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| format!("{}({})", self.graph[e.target()], e.weight().as_ref()))
                .collect();
            if outgoing.is_empty() {
                lines.push(format!("{} -> (end)", self.graph[idx]));
            } else {
                lines.push(format!("{} -> {}", self.graph[idx], outgoing.join(", ")));
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}

impl<'a> Action<'a> {
    pub fn name(&self) -> &'a str {
        self.flow.graph[self.idx].as_str()
    }

    /// The successor on the given outcome, if any.
    pub fn next(
        &self,
        succ: bool,
    ) -> Option<Action<'a>> {
        self.flow.successor(self.idx, succ.into()).map(|idx| Action {
            flow: self.flow,
            idx,
        })
    }

    /// True when the action has no success successor.
    pub fn is_final(&self) -> bool {
        self.flow.successor(self.idx, Branch::Success).is_none()
    }

    /// True when the action is only entered after a failure, e.g. Rollback.
    /// Finishing such an action ends the node-task in Failure whatever its own outcome.
    pub fn is_failure_branch(&self) -> bool {
        let mut incoming = self.flow.graph.edges_directed(self.idx, Direction::Incoming).peekable();
        incoming.peek().is_some() && incoming.all(|e| *e.weight() == Branch::Failure)
    }

    /// Whether a report with outcome `succ` ends the node-task. A failure only
    /// ends it when there is no failure successor to run.
    pub fn ends_with(
        &self,
        succ: bool,
    ) -> bool {
        if succ { self.is_final() } else { self.next(false).is_none() }
    }
}

impl fmt::Debug for Action<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("Action").field(&self.name()).finish()
    }
}

impl PartialEq for Action<'_> {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        std::ptr::eq(self.flow, other.flow) && self.idx == other.idx
    }
}

/// Assembles and validates an [`ActionFlow`].
pub struct FlowBuilder {
    first: String,
    edges: Vec<(String, String, Branch)>,
}

impl FlowBuilder {
    pub fn new(first: &str) -> Self {
        Self {
            first: first.to_string(),
            edges: Vec::new(),
        }
    }

    pub fn success(
        mut self,
        from: &str,
        to: &str,
    ) -> Self {
        self.edges.push((from.to_string(), to.to_string(), Branch::Success));
        self
    }

    pub fn failure(
        mut self,
        from: &str,
        to: &str,
    ) -> Self {
        self.edges.push((from.to_string(), to.to_string(), Branch::Failure));
        self
    }

    pub fn build(self) -> Result<ActionFlow> {
        let mut graph: DiGraph<String, Branch> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

        let first = graph.add_node(self.first.clone());
        nodes.insert(self.first.clone(), first);

        for (from, to, branch) in self.edges.iter() {
            let from_idx = *nodes.entry(from.clone()).or_insert_with(|| graph.add_node(from.clone()));
            let to_idx = *nodes.entry(to.clone()).or_insert_with(|| graph.add_node(to.clone()));

            if graph.edges_directed(from_idx, Direction::Outgoing).any(|e| e.weight() == branch) {
                return Err(EdgeTaskError::Config(format!("action {} has two {} successors", from, branch.as_ref())));
            }
            graph.add_edge(from_idx, to_idx, *branch);
        }

        if is_cyclic_directed(&graph) {
            return Err(EdgeTaskError::Config(format!("flow starting at {} is cyclic", self.first)));
        }

        let mut reachable = 0;
        let mut dfs = Dfs::new(&graph, first);
        while dfs.next(&graph).is_some() {
            reachable += 1;
        }
        if reachable != graph.node_count() {
            return Err(EdgeTaskError::Config(format!("flow starting at {} has unreachable actions", self.first)));
        }

        Ok(ActionFlow {
            graph,
            first,
        })
    }
}
