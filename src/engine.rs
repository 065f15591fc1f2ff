//! The search engine
//!
//! This module owns the pipeline every strategy shares: replaying a path
//! against a fresh browser session, expanding a node through the proposer,
//! scoring trajectories and backpropagating rewards. The strategies in
//! [`crate::strategy`] only decide which node enters the pipeline next.
//!
//! Every collaborator call goes through [`SearchEngine::guarded`], which bounds
//! it with a timeout and races it against the run's cancellation token. No
//! collaborator failure escapes a search: each one degrades to a terminal
//! node or a worst-case score and is reported through the progress sink.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    collaborators::{
        CollaboratorError, CollaboratorResult, Collaborators, Observation, ProposalRequest,
        SessionHandle, TrajectoryStep,
    },
    config::{SearchAlgorithm, SearchConfig},
    policy::{
        backpropagation::{BackpropagationPolicy, StandardPolicy},
        selection::{SelectionPolicy, UctPolicy},
    },
    progress::{NoopReporter, Phase, ProgressEvent, ProgressReporter, SearchEvent},
    stats::SearchStatistics,
    tree::{NodeId, SearchTree, TerminalReason},
    utils, Result,
};

/// Final status of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// The goal was reached
    Success,
    /// Something scored above zero, but not enough to call it a success
    PartialSuccess,
    /// Nothing useful was found
    Failure,
}

/// What a search returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Final status
    pub status: SearchStatus,

    /// Score of the returned trajectory
    pub score: f64,

    /// Node the trajectory ends at; `None` for the reflective MCTS fallback
    /// or when nothing was found
    pub best_node: Option<NodeId>,

    /// Steps from the root to the best node, root excluded
    pub actions: Vec<TrajectoryStep>,

    /// Statistics of the run
    pub statistics: SearchStatistics,
}

/// Result of a replay
#[derive(Debug)]
pub(crate) enum Replay {
    /// Every action ran; the session now sits at the node
    Completed(SessionHandle),
    /// The action of this node failed; it has been marked terminal
    Failed(NodeId),
    /// No session could be obtained
    SessionUnavailable,
    /// The run was cancelled mid-replay; nothing was marked
    Interrupted,
}

/// What a strategy hands back to the engine
#[derive(Debug)]
pub(crate) struct Verdict {
    pub(crate) status: SearchStatus,
    pub(crate) score: f64,
    pub(crate) best_node: Option<NodeId>,
    /// Overrides the trajectory derived from `best_node`
    pub(crate) actions: Option<Vec<TrajectoryStep>>,
}

impl Verdict {
    pub(crate) fn node(status: SearchStatus, score: f64, node: NodeId) -> Self {
        Verdict {
            status,
            score,
            best_node: Some(node),
            actions: None,
        }
    }

    pub(crate) fn nothing() -> Self {
        Verdict {
            status: SearchStatus::Failure,
            score: 0.0,
            best_node: None,
            actions: None,
        }
    }
}

/// Tree search over UI action sequences
///
/// Create one per goal, configure it with the builder methods, then call
/// [`search`](SearchEngine::search). The tree and statistics of the last run
/// stay available afterwards.
pub struct SearchEngine {
    pub(crate) config: SearchConfig,
    pub(crate) collaborators: Collaborators,
    pub(crate) goal: String,
    pub(crate) images: Vec<String>,
    pub(crate) tree: SearchTree,
    pub(crate) selection_policy: Box<dyn SelectionPolicy>,
    pub(crate) statistics: SearchStatistics,
    backpropagation_policy: Box<dyn BackpropagationPolicy>,
    reporter: Arc<dyn ProgressReporter>,
    cancellation: CancellationToken,
    started: Option<Instant>,
}

impl SearchEngine {
    /// Creates an engine for `goal`
    ///
    /// Selection defaults to UCT with the configured exploration weight,
    /// backpropagation to a running average, and progress events are
    /// discarded.
    pub fn new(goal: impl Into<String>, config: SearchConfig, collaborators: Collaborators) -> Self {
        let goal = goal.into();
        let selection_policy: Box<dyn SelectionPolicy> = Box::new(UctPolicy::from_config(&config));
        let backpropagation_policy: Box<dyn BackpropagationPolicy> = Box::new(StandardPolicy::new());

        SearchEngine {
            tree: SearchTree::new(goal.clone()),
            config,
            collaborators,
            goal,
            images: Vec::new(),
            selection_policy,
            statistics: SearchStatistics::new(),
            backpropagation_policy,
            reporter: Arc::new(NoopReporter),
            cancellation: CancellationToken::new(),
            started: None,
        }
    }

    /// Sets the progress sink
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets the selection policy to use
    pub fn with_selection_policy<P: SelectionPolicy + 'static>(mut self, policy: P) -> Self {
        self.selection_policy = Box::new(policy);
        self
    }

    /// Sets the backpropagation policy to use
    pub fn with_backpropagation_policy<P: BackpropagationPolicy + 'static>(
        mut self,
        policy: P,
    ) -> Self {
        self.backpropagation_policy = Box::new(policy);
        self
    }

    /// Uses an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attaches reference images passed to the proposer
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// A handle that cancels the running search
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// The configuration
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The goal
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// The tree of the current or last run
    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }

    /// Returns the search statistics
    pub fn statistics(&self) -> &SearchStatistics {
        &self.statistics
    }

    /// Returns a visualization of the search tree
    pub fn visualize_tree(&self) -> String {
        self.tree.visualize()
    }

    /// Runs the configured strategy on a fresh tree
    ///
    /// Returns an error only for an invalid configuration, before any
    /// collaborator is called.
    pub async fn search(&mut self) -> Result<SearchOutcome> {
        self.config.validate()?;

        self.tree = SearchTree::new(self.goal.clone());
        self.statistics = SearchStatistics::new();
        self.started = Some(Instant::now());

        info!(
            "Starting {} search (max depth {}, branching factor {}) for goal: {}",
            self.config.algorithm, self.config.max_depth, self.config.branching_factor, self.goal
        );
        self.emit(SearchEvent::SearchStarted {
            algorithm: self.config.algorithm,
            goal: self.goal.clone(),
            max_depth: self.config.max_depth,
            iterations: self.config.iterations,
        });

        let verdict = match self.config.algorithm {
            SearchAlgorithm::Bfs => self.run_bfs().await,
            SearchAlgorithm::Dfs => self.run_dfs().await,
            SearchAlgorithm::ReflectiveMcts => self.run_reflective_mcts().await,
            SearchAlgorithm::Lats => self.run_lats().await,
        };

        Ok(self.finish(verdict))
    }

    fn finish(&mut self, verdict: Verdict) -> SearchOutcome {
        if let Some(started) = self.started {
            self.statistics.total_time = started.elapsed();
        }
        if self.is_cancelled() {
            self.statistics.stopped_early = true;
        }
        self.statistics.tree_size = self.tree.committed_len();
        self.statistics.simulated_nodes = self.tree.simulated_len();
        self.statistics.max_depth = self.tree.max_depth();

        let actions = match verdict.actions {
            Some(actions) => actions,
            None => verdict
                .best_node
                .map(|node| self.tree.action_trajectory(node))
                .unwrap_or_default(),
        };

        self.emit_tree_update();
        self.emit(SearchEvent::SearchComplete {
            status: verdict.status,
            score: verdict.score,
            best_node: verdict.best_node,
            path: actions.clone(),
        });
        info!(
            "Search finished: {:?} with score {:.3} after {} steps",
            verdict.status,
            verdict.score,
            actions.len()
        );
        debug!("{}", self.statistics.summary());

        SearchOutcome {
            status: verdict.status,
            score: verdict.score,
            best_node: verdict.best_node,
            actions,
            statistics: self.statistics.clone(),
        }
    }

    /// Checks cancellation and the time budget between iterations and phases
    pub(crate) fn should_stop(&mut self) -> bool {
        if self.cancellation.is_cancelled() {
            if !self.statistics.stopped_early {
                info!("Search cancelled");
            }
            self.statistics.stopped_early = true;
            return true;
        }

        if let (Some(max_time), Some(started)) = (self.config.max_time, self.started) {
            if started.elapsed() >= max_time {
                if !self.statistics.stopped_early {
                    info!("Search stopped early due to time limit");
                }
                self.statistics.stopped_early = true;
                return true;
            }
        }

        false
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn emit(&self, event: SearchEvent) {
        self.reporter.report(ProgressEvent::now(event));
    }

    pub(crate) fn emit_tree_update(&self) {
        if self.config.emit_tree_updates {
            self.emit(SearchEvent::TreeUpdate {
                tree: self.tree.snapshot(),
            });
        }
    }

    pub(crate) fn phase_start(&self, phase: Phase, node: Option<NodeId>) {
        debug!("{:?} phase started at {:?}", phase, node);
        self.emit(SearchEvent::PhaseStart { phase, node });
    }

    pub(crate) fn phase_complete(&self, phase: Phase, node: Option<NodeId>) {
        self.emit(SearchEvent::PhaseComplete { phase, node });
    }

    /// Bounds a collaborator call by `limit` and by the cancellation token
    pub(crate) async fn guarded<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: F,
    ) -> CollaboratorResult<T>
    where
        F: Future<Output = CollaboratorResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(CollaboratorError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(CollaboratorError::Cancelled),
            result = tokio::time::timeout(limit, call) => match result {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout { operation, after: limit }),
            },
        }
    }

    /// Logs and reports a degraded collaborator failure
    pub(crate) fn report_failure(
        &self,
        operation: &'static str,
        node: Option<NodeId>,
        error: &CollaboratorError,
    ) {
        warn!("{} failed at {:?}: {}", operation, node, error);
        self.emit(SearchEvent::CollaboratorError {
            operation: operation.to_string(),
            message: error.to_string(),
            node,
        });
    }

    /// Marks a node terminal, reporting it the first time
    pub(crate) fn terminate(&mut self, node: NodeId, reason: TerminalReason) {
        if self.tree.mark_terminal(node, reason) {
            debug!("Node {} ({}) is terminal: {:?}", node, self.tree[node].label(), reason);
            self.emit(SearchEvent::NodeTerminal { node, reason });
        }
    }

    /// Re-checks `node` and its ancestors for exhausted children
    pub(crate) fn propagate_terminal(&mut self, node: NodeId) {
        for exhausted in self.tree.check_terminal(node) {
            debug!("Node {} has no expandable children left", exhausted);
            self.emit(SearchEvent::NodeTerminal {
                node: exhausted,
                reason: TerminalReason::ChildrenExhausted,
            });
        }
    }

    /// Marks `node` terminal with [`TerminalReason::MaxDepth`] when it sits
    /// at the depth bound
    ///
    /// Returns true when the node is at the bound. The parent is not
    /// re-checked.
    pub(crate) fn close_at_depth_bound(&mut self, node: NodeId) -> bool {
        if self.tree[node].depth() < self.config.max_depth {
            return false;
        }
        self.terminate(node, TerminalReason::MaxDepth);
        true
    }

    /// Closes a scored node at the depth bound and lets its parent re-check
    /// its children
    pub(crate) fn settle_at_depth_bound(&mut self, node: NodeId) {
        if self.close_at_depth_bound(node) {
            if let Some(parent) = self.tree[node].parent() {
                self.propagate_terminal(parent);
            }
        }
    }

    /// Marks `node` terminal and lets its parent re-check its children
    fn settle(&mut self, node: NodeId, reason: TerminalReason) {
        self.terminate(node, reason);
        if let Some(parent) = self.tree[node].parent() {
            self.propagate_terminal(parent);
        }
    }

    /// Resets the browser session and re-executes the path to `node`
    ///
    /// A failed action marks its node terminal. Feedback is fetched once per
    /// node and cached.
    pub(crate) async fn replay(&mut self, node: NodeId) -> Replay {
        let browser = Arc::clone(&self.collaborators.browser);
        let session = match self
            .guarded("reset_session", self.config.action_timeout(), browser.reset_session())
            .await
        {
            Ok(session) => {
                debug!("Browser session {} ready", session.id);
                self.emit(SearchEvent::SessionReset {
                    success: true,
                    session_id: Some(session.id.clone()),
                    live_url: session.live_url.clone(),
                    error: None,
                });
                session
            }
            Err(CollaboratorError::Cancelled) => return Replay::Interrupted,
            Err(e) => {
                warn!("Could not reset browser session: {}", e);
                self.emit(SearchEvent::SessionReset {
                    success: false,
                    session_id: None,
                    live_url: None,
                    error: Some(e.to_string()),
                });
                return Replay::SessionUnavailable;
            }
        };

        let feedback = Arc::clone(&self.collaborators.feedback);
        for step in self.tree.path_to_root(node).into_iter().skip(1) {
            let action = self.tree[step].label().to_string();
            let target = self.tree[step].target.clone();

            let executed = self
                .guarded(
                    "execute",
                    self.config.action_timeout(),
                    browser.execute(&session, &action, target.as_ref()),
                )
                .await;
            let failure = match executed {
                Ok(true) => None,
                Ok(false) => Some(format!("action {} could not run", action)),
                Err(CollaboratorError::Cancelled) => return Replay::Interrupted,
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = failure {
                warn!("Replay failed at node {}: {}", step, reason);
                self.statistics.replay_failures += 1;
                self.settle(step, TerminalReason::ReplayFailed);
                return Replay::Failed(step);
            }

            if self.tree[step].feedback.is_none() {
                let description = self.tree[step].description.clone();
                match self
                    .guarded(
                        "feedback",
                        self.config.llm_timeout(),
                        feedback.feedback(&session, &self.goal, &description),
                    )
                    .await
                {
                    Ok(text) => self.tree[step].feedback = Some(text),
                    Err(CollaboratorError::Cancelled) => return Replay::Interrupted,
                    Err(e) => self.report_failure("feedback", Some(step), &e),
                }
            }
        }

        Replay::Completed(session)
    }

    /// Captures the page state, best-effort
    pub(crate) async fn observe(&self, session: &SessionHandle) -> Option<Observation> {
        let browser = Arc::clone(&self.collaborators.browser);
        match self
            .guarded("observe", self.config.action_timeout(), browser.observe(session))
            .await
        {
            Ok(observation) => Some(observation),
            Err(CollaboratorError::Cancelled) => None,
            Err(e) => {
                debug!("Could not observe page: {}", e);
                None
            }
        }
    }

    /// Replays the path to `node`, asks the proposer for candidates and adds
    /// the viable ones as children
    ///
    /// Returns the new children. A node that ends up with none is terminal.
    pub(crate) async fn expand(&mut self, node: NodeId) -> Vec<NodeId> {
        self.phase_start(Phase::Expansion, Some(node));
        self.statistics.expansions += 1;
        let children = self.expand_inner(node).await;
        self.phase_complete(Phase::Expansion, Some(node));
        self.emit_tree_update();
        children
    }

    async fn expand_inner(&mut self, node: NodeId) -> Vec<NodeId> {
        if self.tree[node].is_terminal() {
            return Vec::new();
        }

        let session = match self.replay(node).await {
            Replay::Completed(session) => session,
            Replay::Failed(_) => {
                self.settle(node, TerminalReason::ReplayFailed);
                return Vec::new();
            }
            Replay::SessionUnavailable => {
                self.settle(node, TerminalReason::SessionUnavailable);
                return Vec::new();
            }
            Replay::Interrupted => return Vec::new(),
        };

        if self.tree[node].observation.is_none() {
            self.tree[node].observation = self.observe(&session).await;
        }
        if self.is_cancelled() {
            return Vec::new();
        }

        let proposer = Arc::clone(&self.collaborators.proposer);
        let trajectory = self.tree.action_trajectory(node);
        let request = ProposalRequest {
            trajectory: &trajectory,
            goal: &self.goal,
            images: &self.images,
            observation: self.tree[node].observation.as_ref(),
            branching_factor: self.config.branching_factor,
        };
        let mut candidates = match self
            .guarded("propose", self.config.llm_timeout(), proposer.propose(request))
            .await
        {
            Ok(candidates) => candidates,
            Err(CollaboratorError::Cancelled) => return Vec::new(),
            Err(e) => {
                self.statistics.proposer_failures += 1;
                self.report_failure("propose", Some(node), &e);
                Vec::new()
            }
        };
        candidates.truncate(self.config.branching_factor);

        let threshold = self.config.finish_probability_threshold;
        if let Some(finish) = candidates
            .iter()
            .find(|c| c.is_finish() && c.probability > threshold)
        {
            info!(
                "Proposer considers the goal met at node {} (p = {:.2})",
                node, finish.probability
            );
            self.settle(node, TerminalReason::FinishAction);
            return Vec::new();
        }

        let browser = Arc::clone(&self.collaborators.browser);
        let mut children = Vec::with_capacity(candidates.len());
        for candidate in candidates.into_iter().filter(|c| !c.is_finish()) {
            let target = match self
                .guarded(
                    "resolve_element",
                    self.config.action_timeout(),
                    browser.resolve_element(&session, &candidate.action),
                )
                .await
            {
                Ok(target) => target,
                Err(e) => {
                    debug!("No element resolved for {}: {}", candidate.action, e);
                    None
                }
            };

            let child = self.tree.add_child(node, candidate, target);
            let created = &self.tree[child];
            debug!(
                "Created node {} at depth {}: {} ({})",
                child,
                created.depth(),
                created.label(),
                created.description
            );
            self.emit(SearchEvent::NodeCreated {
                node: child,
                parent: node,
                action: created.label().to_string(),
                description: created.description.clone(),
                depth: created.depth(),
            });
            children.push(child);
        }

        if children.is_empty() {
            self.settle(node, TerminalReason::NoViableActions);
        }

        children
    }

    /// Scores the trajectory ending at `node`
    ///
    /// An empty trajectory scores 0 without calling the scorer.
    pub(crate) async fn score_trajectory(&mut self, node: NodeId) -> CollaboratorResult<f64> {
        let trajectory = self.tree.action_trajectory(node);
        if trajectory.is_empty() {
            return Ok(0.0);
        }

        let scorer = Arc::clone(&self.collaborators.scorer);
        let screenshot = self.tree[node]
            .observation
            .as_ref()
            .and_then(|o| o.screenshot.as_deref());
        let result = self
            .guarded(
                "score",
                self.config.llm_timeout(),
                scorer.score(&trajectory, &self.goal, screenshot),
            )
            .await
            .and_then(|report| {
                debug!(
                    "Node {} scored {:.3} (efficiency {:.2}, accuracy {:.2}, robustness {:.2})",
                    node,
                    report.overall_score,
                    report.efficiency_score,
                    report.accuracy_score,
                    report.robustness_score
                );
                utils::normalize_score(report.overall_score).ok_or_else(|| {
                    CollaboratorError::malformed(format!(
                        "overall_score is not a number: {}",
                        report.overall_score
                    ))
                })
            });

        if let Err(e) = &result {
            if !matches!(e, CollaboratorError::Cancelled) {
                self.statistics.scorer_failures += 1;
                self.report_failure("score", Some(node), e);
            }
        }
        result
    }

    /// Scores one node and stores the score as its value and reward
    ///
    /// A failed evaluation stores 0 and returns `None`.
    pub(crate) async fn evaluate_node(&mut self, node: NodeId) -> Option<f64> {
        self.phase_start(Phase::Evaluation, Some(node));
        let score = self.score_trajectory(node).await.ok();
        let stored = score.unwrap_or(0.0);
        self.tree[node].value = stored;
        self.tree[node].reward = stored;
        self.phase_complete(Phase::Evaluation, Some(node));
        score
    }

    /// Scores every child of `parent`; failures store 0
    pub(crate) async fn evaluate_children(&mut self, parent: NodeId) {
        self.phase_start(Phase::Evaluation, Some(parent));
        let children = self.tree[parent].children().to_vec();
        info!("Evaluating {} children of node {}", children.len(), parent);
        for child in children {
            if self.is_cancelled() {
                break;
            }
            let score = self.score_trajectory(child).await.unwrap_or(0.0);
            self.tree[child].value = score;
            self.tree[child].reward = score;
        }
        self.phase_complete(Phase::Evaluation, Some(parent));
        self.emit_tree_update();
    }

    /// Folds `reward` into every committed node from `from` up to the root
    ///
    /// Rollout nodes are skipped, and so is the root when `include_root` is
    /// false. Returns the number of nodes updated.
    pub(crate) fn backpropagate(&mut self, from: NodeId, reward: f64, include_root: bool) -> usize {
        self.phase_start(Phase::Backpropagation, Some(from));
        let mut updated = 0;
        for node in self.tree.path_to_root(from).into_iter().rev() {
            let target = &self.tree[node];
            if target.is_simulated() || (target.is_root() && !include_root) {
                continue;
            }
            self.backpropagation_policy
                .update_stats(&mut self.tree[node], reward);
            updated += 1;
        }
        debug!("Backpropagated {:.3} through {} nodes", reward, updated);
        self.emit(SearchEvent::BackpropagationComplete {
            node: from,
            reward,
            updated,
        });
        self.phase_complete(Phase::Backpropagation, Some(from));
        updated
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("goal", &self.goal)
            .field("config", &self.config)
            .field("tree_size", &self.tree.len())
            .field("statistics", &self.statistics)
            .finish()
    }
}
