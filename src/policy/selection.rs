//! Selection policies for tree descent
//!
//! Selection policies determine which child to descend into, balancing
//! exploration and exploitation. LATS uses them through
//! [`SearchTree::best_leaf`]; reflective MCTS falls back to them when no
//! language-model advisor is configured.

use crate::{
    config::{SearchConfig, UnvisitedScore},
    tree::{NodeId, SearchTree},
    utils,
};

/// Trait for policies that select nodes to explore
pub trait SelectionPolicy: Send + Sync {
    /// Picks one of `node`'s non-terminal children, or `None` if it has none
    fn select_child(&self, tree: &SearchTree, node: NodeId) -> Option<NodeId>;

    /// Create a boxed clone of this policy
    fn clone_box(&self) -> Box<dyn SelectionPolicy>;
}

/// Upper Confidence bound for Trees (UCT) selection policy
///
/// ```text
/// UCT = value / visits + exploration_weight * sqrt(ln(parent_visits) / visits)
/// ```
///
/// With the default weight of sqrt(2) this is the classic
/// `v/n + sqrt(2 ln N / n)`. A child that has never been visited scores
/// according to [`UnvisitedScore`]. Ties go to the earlier-proposed child.
#[derive(Debug, Clone)]
pub struct UctPolicy {
    /// Exploration constant
    pub exploration_weight: f64,

    /// Score of a never-visited child
    pub unvisited: UnvisitedScore,
}

impl UctPolicy {
    /// Creates a UCT policy with the given exploration weight
    pub fn new(exploration_weight: f64) -> Self {
        UctPolicy {
            exploration_weight,
            unvisited: UnvisitedScore::Infinity,
        }
    }

    /// Builds the policy described by a configuration
    pub fn from_config(config: &SearchConfig) -> Self {
        UctPolicy {
            exploration_weight: config.exploration_weight,
            unvisited: config.unvisited_score,
        }
    }

    /// Sets the score of never-visited children
    pub fn with_unvisited_score(mut self, unvisited: UnvisitedScore) -> Self {
        self.unvisited = unvisited;
        self
    }

    /// UCT score of `child` under `parent_visits`
    pub fn score(&self, tree: &SearchTree, child: NodeId, parent_visits: u64) -> f64 {
        let node = &tree[child];
        utils::uct_value(
            node.value,
            node.visits,
            parent_visits,
            self.exploration_weight,
            self.unvisited,
        )
    }
}

impl Default for UctPolicy {
    fn default() -> Self {
        Self::new(std::f64::consts::SQRT_2)
    }
}

impl SelectionPolicy for UctPolicy {
    fn select_child(&self, tree: &SearchTree, node: NodeId) -> Option<NodeId> {
        let parent_visits = tree[node].visits;
        let mut best: Option<(NodeId, f64)> = None;

        for &child in tree[node].children() {
            if tree[child].is_terminal() {
                continue;
            }
            let score = self.score(tree, child, parent_visits);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((child, score)),
            }
        }

        best.map(|(child, _)| child)
    }

    fn clone_box(&self) -> Box<dyn SelectionPolicy> {
        Box::new(self.clone())
    }
}

impl SelectionPolicy for Box<dyn SelectionPolicy> {
    fn select_child(&self, tree: &SearchTree, node: NodeId) -> Option<NodeId> {
        (**self).select_child(tree, node)
    }

    fn clone_box(&self) -> Box<dyn SelectionPolicy> {
        (**self).clone_box()
    }
}
