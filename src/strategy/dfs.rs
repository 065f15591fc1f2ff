//! Depth-first search
//!
//! An explicit stack with a visited set. The top of the stack always moves to
//! its first unvisited open child; a node with none left is popped. Every
//! node is visited (expanded and scored) exactly once, when it is pushed.

use std::collections::HashSet;

use log::{debug, info};

use super::{BestSoFar, Visit};
use crate::{
    engine::{SearchEngine, SearchStatus, Verdict},
    progress::SearchEvent,
    tree::NodeId,
};

impl SearchEngine {
    pub(crate) async fn run_dfs(&mut self) -> Verdict {
        let root = self.tree.root();
        let mut stack = vec![root];
        let mut visited = HashSet::from([root]);
        let mut best = BestSoFar::default();

        if let Some(verdict) = self.dfs_visit(root, &mut stack, &mut best).await {
            return verdict;
        }

        while let Some(&top) = stack.last() {
            if self.should_stop() {
                break;
            }

            let next = self
                .open_children(top)
                .into_iter()
                .find(|child| !visited.contains(child));

            match next {
                Some(child) => {
                    visited.insert(child);
                    stack.push(child);
                    if let Some(verdict) = self.dfs_visit(child, &mut stack, &mut best).await {
                        return verdict;
                    }
                }
                None => {
                    debug!("Backtracking from node {}", top);
                    stack.pop();
                }
            }
        }

        best.into_verdict()
    }

    /// Visits the node on top of the stack; pops it again if it turned out
    /// terminal
    async fn dfs_visit(
        &mut self,
        node: NodeId,
        stack: &mut Vec<NodeId>,
        best: &mut BestSoFar,
    ) -> Option<Verdict> {
        let iteration = self.statistics.iterations + 1;
        self.statistics.iterations = iteration;
        self.emit(SearchEvent::IterationStart { iteration });

        let visit = self.visit(node).await;
        self.emit_tree_update();

        match visit {
            Visit::Scored(score) => {
                best.offer(node, score);
                if score >= self.config.success_threshold {
                    info!("Node {} reached score {:.3}", node, score);
                    return Some(Verdict::node(SearchStatus::Success, score, node));
                }
            }
            Visit::Skipped => {
                if self.tree[node].is_terminal() {
                    stack.pop();
                }
            }
        }
        None
    }
}
