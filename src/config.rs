//! Configuration options for the search engine
//!
//! This module defines the parameters that control which search strategy
//! runs, how far it may go, and how patiently it waits on its collaborators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{collaborators::CandidateAction, Result, SearchError};

/// The search strategy run by [`SearchEngine::search`](crate::SearchEngine::search)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAlgorithm {
    /// Level-by-level expansion with an immediate return on a good enough score
    Bfs,
    /// One child at a time with backtracking
    Dfs,
    /// Advisor-guided descent with reflection-based backtracking
    ReflectiveMcts,
    /// UCT-guided Language Action Tree Search with rollouts
    Lats,
}

impl std::fmt::Display for SearchAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchAlgorithm::Bfs => "bfs",
            SearchAlgorithm::Dfs => "dfs",
            SearchAlgorithm::ReflectiveMcts => "reflective_mcts",
            SearchAlgorithm::Lats => "lats",
        };
        f.write_str(name)
    }
}

/// UCT score assigned to a node that has never been visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnvisitedScore {
    /// Unvisited nodes always win selection
    Infinity,

    /// Unvisited nodes score their evaluated value
    ///
    /// A freshly created node then ranks below any visited sibling with a
    /// positive exploration bonus.
    Value,
}

/// Configuration for a search run
///
/// Use the builder methods to create a customized configuration.
///
/// # Example
///
/// ```
/// use arboriter_lats::{SearchConfig, config::SearchAlgorithm};
/// use std::time::Duration;
///
/// let config = SearchConfig::default()
///     .with_algorithm(SearchAlgorithm::Bfs)
///     .with_max_depth(2)
///     .with_branching_factor(3)
///     .with_max_time(Duration::from_secs(600));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Strategy to run
    pub algorithm: SearchAlgorithm,

    /// Iteration budget for LATS and reflective MCTS
    ///
    /// BFS and DFS run until they succeed or exhaust the depth-bounded tree.
    pub iterations: usize,

    /// Maximum depth of the committed tree and of rollouts
    pub max_depth: usize,

    /// Number of candidate actions requested per expansion
    pub branching_factor: usize,

    /// Exploration constant for UCT
    ///
    /// The standard value is sqrt(2), giving `v/n + sqrt(2 ln N / n)`.
    pub exploration_weight: f64,

    /// UCT score of a node that has never been visited
    pub unvisited_score: UnvisitedScore,

    /// BFS/DFS stop as soon as a node scores at least this much
    pub success_threshold: f64,

    /// Reflective MCTS asks for a backtrack when a path scores below this
    pub reflection_threshold: f64,

    /// A proposed finish action with a probability above this stops the node
    pub finish_probability_threshold: f64,

    /// Attempts per rollout continuation step
    pub rollout_retry_count: usize,

    /// Whole-step restarts allowed per rollout before it returns what it has
    pub max_rollout_restarts: usize,

    /// Whether LATS backpropagation updates the depth-0 root
    pub backpropagate_root: bool,

    /// Bound on every browser operation, in milliseconds
    pub action_timeout_ms: u64,

    /// Bound on every language-model call, in milliseconds
    pub llm_timeout_ms: u64,

    /// Optional wall-clock budget, checked between iterations
    pub max_time: Option<Duration>,

    /// Single-action path returned by reflective MCTS when nothing scored above zero
    pub fallback_action: CandidateAction,

    /// Whether tree snapshots are reported after each phase
    pub emit_tree_updates: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            algorithm: SearchAlgorithm::Lats,
            iterations: 10,
            max_depth: 3,
            branching_factor: 5,
            exploration_weight: std::f64::consts::SQRT_2,
            unvisited_score: UnvisitedScore::Infinity,
            success_threshold: 0.75,
            reflection_threshold: 0.75,
            finish_probability_threshold: 0.2,
            rollout_retry_count: 3,
            max_rollout_restarts: 2,
            backpropagate_root: false,
            action_timeout_ms: 5_000,
            llm_timeout_ms: 60_000,
            max_time: None,
            fallback_action: CandidateAction {
                action: "refresh()".to_string(),
                description: "Retry with different approach".to_string(),
                probability: 0.1,
            },
            emit_tree_updates: true,
        }
    }
}

impl SearchConfig {
    /// Loads a configuration from a JSON document
    ///
    /// Missing fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can drive a search
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(SearchError::InvalidConfiguration(
                "max_depth must be at least 1".into(),
            ));
        }
        if self.branching_factor == 0 {
            return Err(SearchError::InvalidConfiguration(
                "branching_factor must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("success_threshold", self.success_threshold),
            ("reflection_threshold", self.reflection_threshold),
            ("finish_probability_threshold", self.finish_probability_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SearchError::InvalidConfiguration(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if !self.exploration_weight.is_finite() || self.exploration_weight < 0.0 {
            return Err(SearchError::InvalidConfiguration(format!(
                "exploration_weight must be a non-negative number, got {}",
                self.exploration_weight
            )));
        }
        if self.rollout_retry_count == 0 {
            return Err(SearchError::InvalidConfiguration(
                "rollout_retry_count must be at least 1".into(),
            ));
        }
        if self.action_timeout_ms == 0 || self.llm_timeout_ms == 0 {
            return Err(SearchError::InvalidConfiguration(
                "timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Bound on browser operations
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Bound on language-model calls
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    /// Sets the search strategy
    pub fn with_algorithm(mut self, algorithm: SearchAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the iteration budget
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the number of candidates requested per expansion
    pub fn with_branching_factor(mut self, branching_factor: usize) -> Self {
        self.branching_factor = branching_factor;
        self
    }

    /// Sets the UCT exploration constant
    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    /// Sets the UCT score of unvisited nodes
    pub fn with_unvisited_score(mut self, unvisited: UnvisitedScore) -> Self {
        self.unvisited_score = unvisited;
        self
    }

    /// Sets the BFS/DFS success threshold
    pub fn with_success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the reflective MCTS reflection threshold
    pub fn with_reflection_threshold(mut self, threshold: f64) -> Self {
        self.reflection_threshold = threshold;
        self
    }

    /// Sets the probability above which a finish action stops a node
    pub fn with_finish_probability_threshold(mut self, threshold: f64) -> Self {
        self.finish_probability_threshold = threshold;
        self
    }

    /// Sets the number of attempts per rollout step
    pub fn with_rollout_retry_count(mut self, retries: usize) -> Self {
        self.rollout_retry_count = retries;
        self
    }

    /// Sets how many times a rollout may restart a failed step
    pub fn with_max_rollout_restarts(mut self, restarts: usize) -> Self {
        self.max_rollout_restarts = restarts;
        self
    }

    /// Sets whether LATS backpropagation updates the root
    pub fn with_backpropagate_root(mut self, enabled: bool) -> Self {
        self.backpropagate_root = enabled;
        self
    }

    /// Sets the browser operation timeout, rounded up to whole milliseconds
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Sets the language-model call timeout, rounded up to whole milliseconds
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Sets the wall-clock budget
    pub fn with_max_time(mut self, duration: Duration) -> Self {
        self.max_time = Some(duration);
        self
    }

    /// Sets the reflective MCTS fallback action
    pub fn with_fallback_action(mut self, action: CandidateAction) -> Self {
        self.fallback_action = action;
        self
    }

    /// Sets whether tree snapshots are reported
    pub fn with_tree_updates(mut self, enabled: bool) -> Self {
        self.emit_tree_updates = enabled;
        self
    }
}

// Sub-millisecond remainders round up so a non-zero timeout never becomes 0
fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}
