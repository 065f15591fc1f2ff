//! Breadth-first search
//!
//! The frontier is a FIFO queue seeded with the root. Each iteration drains
//! one full level: every node is expanded (if it can be), scored, and its
//! open children are queued for the next level. The search returns as soon as
//! a node reaches the success threshold.

use std::collections::{HashSet, VecDeque};

use log::info;

use super::{BestSoFar, Visit};
use crate::{
    engine::{SearchEngine, SearchStatus, Verdict},
    progress::SearchEvent,
};

impl SearchEngine {
    pub(crate) async fn run_bfs(&mut self) -> Verdict {
        let root = self.tree.root();
        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);
        let mut best = BestSoFar::default();
        let mut level = 0;

        'levels: while !queue.is_empty() {
            if self.should_stop() {
                break;
            }
            level += 1;
            self.statistics.iterations = level;
            self.emit(SearchEvent::IterationStart { iteration: level });
            info!("BFS level {}: {} nodes", level, queue.len());

            let current_level: Vec<_> = queue.drain(..).collect();
            for node in current_level {
                if self.should_stop() {
                    break 'levels;
                }

                if let Visit::Scored(score) = self.visit(node).await {
                    best.offer(node, score);
                    if score >= self.config.success_threshold {
                        info!("Node {} reached score {:.3}", node, score);
                        return Verdict::node(SearchStatus::Success, score, node);
                    }
                }

                if self.tree[node].is_terminal() {
                    continue;
                }
                for child in self.open_children(node) {
                    if seen.insert(child) {
                        queue.push_back(child);
                    }
                }
            }

            self.emit_tree_update();
        }

        best.into_verdict()
    }
}
