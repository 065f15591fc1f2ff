//! Search strategies
//!
//! Each strategy is a state machine layered on the engine's shared pipeline.
//! They differ only in which node enters the pipeline next, how they stop,
//! and how they pick the result.
//!
//! - [`bfs`]: level by level, immediate return on a good enough score
//! - [`dfs`]: one child at a time, backtracking when a node runs out
//! - [`reflective`]: advisor-guided path with reflection-based backtracking
//! - [`lats`]: UCT selection, batch evaluation, rollouts

pub mod bfs;
pub mod dfs;
pub mod lats;
pub mod reflective;

use log::debug;

use crate::{
    engine::{SearchEngine, SearchStatus, Verdict},
    progress::{SearchEvent, SelectionPurpose},
    tree::NodeId,
};

/// Result of visiting one node in BFS or DFS
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Visit {
    /// The node was terminal, or became terminal while being expanded
    Skipped,
    /// The node was evaluated; a failed evaluation ranks as negative infinity
    Scored(f64),
}

/// Best node seen by BFS or DFS
#[derive(Debug, Default)]
pub(crate) struct BestSoFar {
    best: Option<(NodeId, f64)>,
}

impl BestSoFar {
    pub(crate) fn offer(&mut self, node: NodeId, score: f64) {
        if !score.is_finite() {
            return;
        }
        match self.best {
            Some((_, best)) if score <= best => {}
            _ => self.best = Some((node, score)),
        }
    }

    /// Verdict once the tree is exhausted or the search stopped
    pub(crate) fn into_verdict(self) -> Verdict {
        match self.best {
            Some((node, score)) => Verdict::node(SearchStatus::PartialSuccess, score, node),
            None => Verdict::nothing(),
        }
    }
}

impl SearchEngine {
    /// Expands `node` when it is an unexpanded leaf inside the depth bound,
    /// then evaluates it unless it is, or just became, terminal
    ///
    /// The root is never scored: its trajectory is empty. A scored node at the
    /// depth bound becomes terminal.
    pub(crate) async fn visit(&mut self, node: NodeId) -> Visit {
        if self.tree[node].is_terminal() {
            debug!("Skipping terminal node {}", node);
            return Visit::Skipped;
        }

        self.emit(SearchEvent::NodeSelected {
            node,
            purpose: SelectionPurpose::Expansion,
            depth: self.tree[node].depth(),
        });

        if self.tree[node].depth() < self.config.max_depth && self.tree[node].is_leaf() {
            self.expand(node).await;
            if self.tree[node].is_terminal() {
                return Visit::Skipped;
            }
        }

        if self.tree[node].is_root() || self.is_cancelled() {
            return Visit::Skipped;
        }

        let score = self.evaluate_node(node).await.unwrap_or(f64::NEG_INFINITY);
        self.settle_at_depth_bound(node);
        Visit::Scored(score)
    }

    /// Non-terminal children of `node` inside the depth bound, in proposal order
    pub(crate) fn open_children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree[node]
            .children()
            .iter()
            .copied()
            .filter(|&c| !self.tree[c].is_terminal() && self.tree[c].depth() <= self.config.max_depth)
            .collect()
    }
}
