//! Statistics collection for searches
//!
//! This module provides the counters the engine keeps while it runs, and a
//! human-readable summary of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Statistics collected during a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatistics {
    /// Number of iterations performed
    pub iterations: usize,

    /// Total time spent searching
    pub total_time: Duration,

    /// Number of committed nodes in the tree, root included
    pub tree_size: usize,

    /// Number of rollout nodes created
    pub simulated_nodes: usize,

    /// Maximum depth reached in the committed tree
    pub max_depth: usize,

    /// Number of expansion attempts
    pub expansions: usize,

    /// Replays that stopped on a failed action
    pub replay_failures: usize,

    /// Proposer calls that failed or timed out
    pub proposer_failures: usize,

    /// Scorer calls that failed or timed out
    pub scorer_failures: usize,

    /// Whether the search was stopped by cancellation or the time budget
    pub stopped_early: bool,
}

impl SearchStatistics {
    /// Creates a new, empty statistics object
    pub fn new() -> Self {
        SearchStatistics {
            iterations: 0,
            total_time: Duration::from_secs(0),
            tree_size: 1, // Start with root node
            simulated_nodes: 0,
            max_depth: 0,
            expansions: 0,
            replay_failures: 0,
            proposer_failures: 0,
            scorer_failures: 0,
            stopped_early: false,
        }
    }

    /// Returns the average time per iteration in milliseconds
    pub fn avg_time_per_iteration_ms(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.total_time.as_secs_f64() * 1000.0 / self.iterations as f64
    }

    /// Total number of collaborator failures the search absorbed
    pub fn collaborator_failures(&self) -> usize {
        self.replay_failures + self.proposer_failures + self.scorer_failures
    }

    /// Returns a summary of the statistics as a string
    pub fn summary(&self) -> String {
        format!(
            "Search Statistics:\n\
             - Iterations: {}\n\
             - Total time: {:.3} seconds\n\
             - Tree size: {} nodes ({} simulated)\n\
             - Max depth: {}\n\
             - Expansions: {}\n\
             - Avg time per iteration: {:.1} ms\n\
             - Failures: {} ({} replay, {} proposer, {} scorer)\n\
             - Stopped early: {}",
            self.iterations,
            self.total_time.as_secs_f64(),
            self.tree_size,
            self.simulated_nodes,
            self.max_depth,
            self.expansions,
            self.avg_time_per_iteration_ms(),
            self.collaborator_failures(),
            self.replay_failures,
            self.proposer_failures,
            self.scorer_failures,
            self.stopped_early
        )
    }
}

impl Default for SearchStatistics {
    fn default() -> Self {
        Self::new()
    }
}
