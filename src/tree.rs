//! Tree data structures for the search
//!
//! This module defines the search tree: an append-only arena of nodes where
//! each node is one proposed UI action. Parents own their children through
//! the arena, and children keep a plain index back to their parent, so both
//! walks (up through `parent`, down through `children`) are cycle-free.
//!
//! Rollout nodes created during LATS simulation live in the same arena with a
//! parent link, but are never listed among their parent's children. Walking
//! `children` therefore visits exactly the committed tree.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::collaborators::{CandidateAction, ElementRef, Observation, TrajectoryStep};
use crate::policy::SelectionPolicy;

/// Index of a node inside its [`SearchTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena, in creation order
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a node stopped being expandable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The node sits at the configured depth bound
    MaxDepth,
    /// Expansion produced no children
    NoViableActions,
    /// The proposer confidently said the goal is met
    FinishAction,
    /// The node's action failed during a replay
    ReplayFailed,
    /// No browser session could be obtained to expand the node
    SessionUnavailable,
    /// Every child of the node is terminal
    ChildrenExhausted,
}

/// One step in a candidate action sequence
#[derive(Debug, Clone)]
pub struct Node {
    /// Natural-language summary of the action; empty for the root
    pub description: String,

    /// Action command string (None for root)
    pub action: Option<String>,

    /// Proposer confidence for the action
    pub probability: f64,

    /// UI element the action applies to
    pub target: Option<ElementRef>,

    /// The search objective
    pub goal: String,

    /// Number of backpropagations through this node
    pub visits: u64,

    /// Running average of backpropagated rewards, or the latest evaluation
    pub value: f64,

    /// Score of the trajectory ending at this node
    pub reward: f64,

    /// Post-action page description, cached after the first replay
    pub feedback: Option<String>,

    /// Page state captured before expanding this node
    pub observation: Option<Observation>,

    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
    terminal: Option<TerminalReason>,
    simulated: bool,
}

impl Node {
    fn new(id: NodeId, goal: String, parent: Option<NodeId>, depth: usize) -> Self {
        Node {
            description: String::new(),
            action: None,
            probability: 0.0,
            target: None,
            goal,
            visits: 0,
            value: 0.0,
            reward: 0.0,
            feedback: None,
            observation: None,
            id,
            parent,
            children: Vec::new(),
            depth,
            terminal: None,
            simulated: false,
        }
    }

    /// This node's id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node this one was expanded from
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Committed children, in proposal order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Distance from the root (root = 0)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns true once the node can no longer be expanded
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Why the node became terminal, if it did
    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.terminal
    }

    /// Returns true for rollout nodes that are not part of the committed tree
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Returns true if this is the root
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns true if this node has no committed children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The action label used in logs and snapshots
    pub fn label(&self) -> &str {
        self.action.as_deref().unwrap_or("ROOT")
    }

    /// The trajectory step this node contributes
    pub fn step(&self) -> TrajectoryStep {
        TrajectoryStep {
            action: self.label().to_string(),
            description: self.description.clone(),
            target: self.target.clone(),
            feedback: self.feedback.clone(),
        }
    }
}

/// Append-only arena holding every node of one search run
///
/// `NodeId`s handed out by a tree are valid for the lifetime of that tree.
/// Indexing with an id from another tree panics.
#[derive(Debug, Clone)]
pub struct SearchTree {
    nodes: Vec<Node>,
}

impl SearchTree {
    /// Creates a tree holding only the root
    pub fn new(goal: impl Into<String>) -> Self {
        SearchTree {
            nodes: vec![Node::new(NodeId(0), goal.into(), None, 0)],
        }
    }

    /// The root node's id
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The goal shared by every node
    pub fn goal(&self) -> &str {
        &self.nodes[0].goal
    }

    /// Looks up a node
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes, rollout nodes included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree holds at least its root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over every node in creation order, rollout nodes included
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of committed nodes
    pub fn committed_len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.simulated).count()
    }

    /// Number of rollout nodes
    pub fn simulated_len(&self) -> usize {
        self.nodes.len() - self.committed_len()
    }

    /// Deepest committed node
    pub fn max_depth(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.simulated)
            .map(|n| n.depth)
            .max()
            .unwrap_or(0)
    }

    /// Adds a committed child to `parent` and returns its id
    pub fn add_child(
        &mut self,
        parent: NodeId,
        candidate: CandidateAction,
        target: Option<ElementRef>,
    ) -> NodeId {
        let id = self.push_node(parent, candidate, target, false);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Adds a rollout node hanging off `parent`
    ///
    /// The node points back to `parent` but is not one of its children.
    pub fn add_simulated(
        &mut self,
        parent: NodeId,
        candidate: CandidateAction,
        target: Option<ElementRef>,
    ) -> NodeId {
        self.push_node(parent, candidate, target, true)
    }

    fn push_node(
        &mut self,
        parent: NodeId,
        candidate: CandidateAction,
        target: Option<ElementRef>,
        simulated: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent_node = &self.nodes[parent.0];
        let mut node = Node::new(id, parent_node.goal.clone(), Some(parent), parent_node.depth + 1);
        node.action = Some(candidate.action);
        node.description = candidate.description;
        node.probability = candidate.probability;
        node.target = target;
        node.simulated = simulated;
        self.nodes.push(node);
        id
    }

    /// Ids from the root to `id`, both inclusive
    pub fn path_to_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::with_capacity(self[id].depth + 1);
        let mut current = Some(id);
        while let Some(node) = current {
            path.push(node);
            current = self[node].parent;
        }
        path.reverse();
        path
    }

    /// The executed steps leading to `id`, root excluded, in root-to-node order
    pub fn action_trajectory(&self, id: NodeId) -> Vec<TrajectoryStep> {
        self.path_to_root(id)
            .into_iter()
            .skip(1)
            .map(|n| self[n].step())
            .collect()
    }

    /// Descends from `start` by repeatedly taking the policy's pick among
    /// non-terminal children
    ///
    /// Returns `None` when `start` itself is terminal.
    pub fn best_leaf(&self, start: NodeId, policy: &dyn SelectionPolicy) -> Option<NodeId> {
        if self[start].is_terminal() {
            return None;
        }

        let mut current = start;
        while let Some(next) = policy.select_child(self, current) {
            current = next;
        }
        Some(current)
    }

    /// Marks a node terminal
    ///
    /// Returns true if the node was not terminal before. A terminal node keeps
    /// its first reason.
    pub fn mark_terminal(&mut self, id: NodeId, reason: TerminalReason) -> bool {
        let node = &mut self.nodes[id.0];
        if node.terminal.is_some() {
            return false;
        }
        node.terminal = Some(reason);
        true
    }

    /// Marks `id` terminal if it has no children or only terminal children,
    /// then re-checks its ancestors
    ///
    /// Returns the nodes that became terminal, deepest first.
    pub fn check_terminal(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut newly_terminal = Vec::new();
        let mut current = id;

        loop {
            let exhausted = {
                let node = &self[current];
                node.children.iter().all(|&c| self[c].is_terminal())
            };
            if !exhausted {
                break;
            }
            if self.mark_terminal(current, TerminalReason::ChildrenExhausted) {
                newly_terminal.push(current);
            }
            match self[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        newly_terminal
    }

    /// Committed nodes in depth-first pre-order, following `children`
    pub fn committed(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self[id].children.iter().rev());
        }
        order
    }

    /// Read-only projection of the tree, rollout nodes included
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            goal: self.goal().to_string(),
            nodes: self.nodes.iter().map(NodeSnapshot::from).collect(),
        }
    }

    /// Returns an indented text rendering of the committed tree
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        self.visualize_node(self.root(), &mut output);
        output
    }

    fn visualize_node(&self, id: NodeId, output: &mut String) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self[current];
            let indent = "  ".repeat(node.depth);
            output.push_str(&format!(
                "{}{} (visits: {}, value: {:.3}, reward: {:.3}){}\n",
                indent,
                node.label(),
                node.visits,
                node.value,
                node.reward,
                if node.is_terminal() { " [terminal]" } else { "" }
            ));
            stack.extend(node.children.iter().rev());
        }
    }
}

impl Index<NodeId> for SearchTree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for SearchTree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}

impl fmt::Display for SearchTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.visualize())
    }
}

/// Serializable view of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub action: String,
    pub description: String,
    pub depth: usize,
    pub is_terminal: bool,
    pub value: f64,
    pub visits: u64,
    pub reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub simulated: bool,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        NodeSnapshot {
            id: node.id,
            parent_id: node.parent,
            action: node.label().to_string(),
            description: node.description.clone(),
            depth: node.depth,
            is_terminal: node.is_terminal(),
            value: node.value,
            visits: node.visits,
            reward: node.reward,
            feedback: node.feedback.clone(),
            simulated: node.simulated,
        }
    }
}

/// Serializable view of a whole tree, for visualization sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub goal: String,
    pub nodes: Vec<NodeSnapshot>,
}
