//! Progress events and the sinks that receive them
//!
//! The engine pushes one [`ProgressEvent`] at every pipeline boundary. Sinks
//! are fire-and-forget: reporting never blocks the search and never fails it,
//! and the engine behaves identically with the [`NoopReporter`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    collaborators::TrajectoryStep,
    config::SearchAlgorithm,
    engine::SearchStatus,
    tree::{NodeId, TerminalReason, TreeSnapshot},
};

/// Pipeline phase named in phase events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Selection,
    Expansion,
    Evaluation,
    Simulation,
    Reflection,
    Backpropagation,
}

/// Why a node was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPurpose {
    /// The node is about to be expanded
    Expansion,
    /// A rollout starts from the node
    Simulation,
    /// The node was appended to the current path
    Path,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    SearchStarted {
        algorithm: SearchAlgorithm,
        goal: String,
        max_depth: usize,
        iterations: usize,
    },
    IterationStart {
        iteration: usize,
    },
    PhaseStart {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
    },
    PhaseComplete {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
    },
    SessionReset {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        live_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NodeCreated {
        node: NodeId,
        parent: NodeId,
        action: String,
        description: String,
        depth: usize,
    },
    NodeSelected {
        node: NodeId,
        purpose: SelectionPurpose,
        depth: usize,
    },
    NodeTerminal {
        node: NodeId,
        reason: TerminalReason,
    },
    NodeSimulated {
        node: NodeId,
        parent: NodeId,
        action: String,
        description: String,
        depth: usize,
    },
    SimulationResult {
        node: NodeId,
        reward: f64,
        steps: usize,
    },
    SimulationRemoved {
        nodes: Vec<NodeId>,
        trajectory: Vec<TrajectoryStep>,
    },
    Reflection {
        score: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backtrack_to_step: Option<usize>,
        reason: String,
        skipped: bool,
    },
    Backtracking {
        from_len: usize,
        to_len: usize,
    },
    BackpropagationComplete {
        node: NodeId,
        reward: f64,
        updated: usize,
    },
    TreeUpdate {
        tree: TreeSnapshot,
    },
    CollaboratorError {
        operation: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
    },
    SearchComplete {
        status: SearchStatus,
        score: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_node: Option<NodeId>,
        path: Vec<TrajectoryStep>,
    },
}

/// A timestamped [`SearchEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SearchEvent,
}

impl ProgressEvent {
    /// Stamps an event with the current time
    pub fn now(event: SearchEvent) -> Self {
        ProgressEvent {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Sink for progress events
pub trait ProgressReporter: Send + Sync {
    /// Receives one event; must not block
    fn report(&self, event: ProgressEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes every event through the `log` facade as one JSON line
#[derive(Debug, Clone)]
pub struct LogReporter {
    level: log::Level,
    include_tree_updates: bool,
}

impl LogReporter {
    /// Logs at `level`, tree snapshots excluded
    pub fn new(level: log::Level) -> Self {
        LogReporter {
            level,
            include_tree_updates: false,
        }
    }

    /// Also logs full tree snapshots
    pub fn with_tree_updates(mut self) -> Self {
        self.include_tree_updates = true;
        self
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(log::Level::Info)
    }
}

impl ProgressReporter for LogReporter {
    fn report(&self, event: ProgressEvent) {
        if !self.include_tree_updates && matches!(event.event, SearchEvent::TreeUpdate { .. }) {
            return;
        }
        if !log::log_enabled!(self.level) {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(line) => log::log!(self.level, "{}", line),
            Err(e) => log::warn!("could not serialize progress event: {}", e),
        }
    }
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelReporter { sender }, receiver)
    }

    /// Wraps an existing sender
    pub fn from_sender(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        ChannelReporter { sender }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("progress receiver dropped; event discarded");
        }
    }
}
