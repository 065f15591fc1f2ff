//! # arboriter-lats
//!
//! A tree search engine that drives an agent through a sequence of UI actions
//! toward a natural-language goal.
//!
//! Each node of the search tree is one candidate action. The engine decides
//! which partial action sequence to extend next, how to score it, and when to
//! stop. The slow and unreliable parts (the language model that proposes and
//! rates actions, and the browser that executes them) are injected as
//! collaborators, see [`collaborators`].
//!
//! ## Features
//!
//! - Four interchangeable strategies: breadth-first, depth-first, reflective
//!   Monte Carlo search and UCT-based Language Action Tree Search (LATS)
//! - Arena-backed search tree with path accessors, best-leaf descent and
//!   upward terminal propagation
//! - Pluggable selection and backpropagation policies
//! - Every collaborator call bounded by a timeout and interruptible through a
//!   cancellation token
//! - Structured progress events with a no-op, a `log` and a channel sink
//! - Search statistics and a text visualization of the tree
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use arboriter_lats::{
//!     collaborators::Collaborators, config::SearchAlgorithm, ChannelReporter, SearchConfig,
//!     SearchEngine,
//! };
//!
//! # async fn run(collaborators: Collaborators) -> arboriter_lats::Result<()> {
//! let config = SearchConfig::default()
//!     .with_algorithm(SearchAlgorithm::Lats)
//!     .with_iterations(5)
//!     .with_max_depth(3);
//!
//! let (reporter, mut events) = ChannelReporter::new();
//!
//! let mut engine = SearchEngine::new("Add a new task called 'Write report'", config, collaborators)
//!     .with_reporter(Arc::new(reporter));
//!
//! let outcome = engine.search().await?;
//! println!("{:?} with score {:.2}", outcome.status, outcome.score);
//! for step in &outcome.actions {
//!     println!("  {} ({})", step.action, step.description);
//! }
//! println!("{}", outcome.statistics.summary());
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{}", serde_json::to_string(&event).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! Every strategy runs the same pipeline, in this order, and only decides
//! which node enters it:
//!
//! 1. **Replay**: reset the browser session and re-execute the actions from
//!    the root to the node. A failed action marks its node terminal.
//!
//! 2. **Expansion**: ask the proposer for candidate actions from the replayed
//!    page and add them as children.
//!
//! 3. **Evaluation**: ask the scorer to rate the trajectories.
//!
//! 4. **Simulation**: (LATS) roll the most promising child forward with the
//!    proposer's top choice until the goal checker is satisfied or the depth
//!    bound is hit.
//!
//! 5. **Backpropagation**: fold the reward into the running averages along
//!    the path.
//!
//! Collaborator failures never abort a run. They degrade to a terminal node
//! or a worst-case score, and are reported through the progress sink.
//!
//! ## Working with the tree directly
//!
//! ```
//! use arboriter_lats::{collaborators::CandidateAction, policy::UctPolicy, SearchTree};
//!
//! let mut tree = SearchTree::new("find the settings page");
//! let root = tree.root();
//! let a = tree.add_child(root, CandidateAction::new("click(12)", "Open menu", 0.6), None);
//! let b = tree.add_child(a, CandidateAction::new("click(40)", "Open settings", 0.9), None);
//!
//! assert_eq!(tree.path_to_root(b), vec![root, a, b]);
//! assert_eq!(tree.action_trajectory(b).len(), 2);
//! assert_eq!(tree.best_leaf(root, &UctPolicy::default()), Some(b));
//! ```

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod policy;
pub mod progress;
pub mod stats;
pub mod strategy;
pub mod tree;
pub mod utils;

pub use collaborators::{CandidateAction, CollaboratorError, Collaborators, TrajectoryStep};
pub use config::SearchConfig;
pub use engine::{SearchEngine, SearchOutcome, SearchStatus};
pub use policy::{BackpropagationPolicy, SelectionPolicy};
pub use progress::{
    ChannelReporter, LogReporter, NoopReporter, ProgressEvent, ProgressReporter, SearchEvent,
};
pub use stats::SearchStatistics;
pub use tree::{Node, NodeId, SearchTree, TerminalReason};

/// Error types for the search engine
///
/// Collaborator failures are not errors at this level: the engine absorbs
/// them. Only a configuration that cannot drive a search is rejected.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A configuration document could not be parsed
    #[error("Could not parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;
