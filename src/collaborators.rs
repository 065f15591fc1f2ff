//! Interfaces to the external collaborators the search engine drives.
//!
//! The engine owns no language model and no browser. It talks to them through
//! the traits in this module, which are injected into
//! [`SearchEngine`](crate::SearchEngine) as shared handles so that tests can
//! substitute scripted doubles.
//!
//! Every call is treated as atomic and slow: the engine wraps each one in a
//! timeout and races it against the run's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token a proposer uses to say the goal is already met.
pub const FINISH_ACTION: &str = "finish";

/// Returns true when `action` is the finish sentinel.
pub fn is_finish_action(action: &str) -> bool {
    action.trim().eq_ignore_ascii_case(FINISH_ACTION)
}

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The call did not complete within its bound.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// The run was cancelled while the call was outstanding.
    #[error("cancelled")]
    Cancelled,

    /// The collaborator reported a failure.
    #[error("collaborator failed: {0}")]
    Failed(String),

    /// The collaborator answered with something unusable.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Helper for wrapping a failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Helper for wrapping a malformed-output message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Opaque reference to the UI element an action applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementRef {
    /// Selector that uniquely identifies the element in the page.
    pub selector: String,

    /// Element tag name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Accessible role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Visible text, usually truncated by the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Captured page state: a text feature summary plus an optional screenshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Feature text (accessibility tree, element list, ...).
    pub text: String,

    /// Raw screenshot bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
}

/// One candidate proposed by the [`ActionProposer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAction {
    /// Action command string understood by the [`BrowserDriver`].
    pub action: String,

    /// Natural-language summary of the action.
    pub description: String,

    /// Proposer confidence in `[0, 1]`.
    #[serde(alias = "prob")]
    pub probability: f64,
}

impl CandidateAction {
    /// Creates a candidate.
    pub fn new(action: impl Into<String>, description: impl Into<String>, probability: f64) -> Self {
        CandidateAction {
            action: action.into(),
            description: description.into(),
            probability,
        }
    }

    /// Returns true when this candidate is the finish sentinel.
    pub fn is_finish(&self) -> bool {
        is_finish_action(&self.action)
    }
}

/// One executed step of a trajectory, root excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Action command string.
    pub action: String,

    /// Natural-language summary of the action.
    pub description: String,

    /// Element the action applied to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementRef>,

    /// Post-action page description, if one has been captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Everything the proposer gets to decide on the next actions.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    /// Steps executed so far.
    pub trajectory: &'a [TrajectoryStep],
    /// The objective.
    pub goal: &'a str,
    /// Reference images attached to the goal.
    pub images: &'a [String],
    /// Current page state, when one could be captured.
    pub observation: Option<&'a Observation>,
    /// Upper bound on the number of candidates.
    pub branching_factor: usize,
}

/// Trajectory rating returned by the [`TrajectoryScorer`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Overall completion score in `[0, 1]`.
    pub overall_score: f64,

    /// How directly the trajectory reached its state.
    #[serde(default)]
    pub efficiency_score: f64,

    /// How precisely the actions were executed.
    #[serde(default)]
    pub accuracy_score: f64,

    /// How well the trajectory would survive page variations.
    #[serde(default)]
    pub robustness_score: f64,

    /// Free-form explanation.
    #[serde(default)]
    pub explanation: String,
}

impl ScoreReport {
    /// A report carrying only an overall score.
    pub fn overall(score: f64) -> Self {
        ScoreReport {
            overall_score: score,
            ..Default::default()
        }
    }
}

/// Verdict of the [`GoalFinishedChecker`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GoalAssessment {
    /// Whether the goal is reached.
    pub finished: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Handle to a freshly reset browser session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Driver-specific session identifier.
    pub id: String,

    /// URL of a live view of the session, when the driver offers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
}

/// Summary of one child shown to the [`PathAdvisor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    /// Action command string.
    pub action: String,
    /// Natural-language summary.
    pub description: String,
    /// Visit count.
    pub visits: u64,
    /// Current value.
    pub value: f64,
}

/// Backtracking advice returned by the [`PathAdvisor`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reflection {
    /// Index into the current path (0 is the root) to backtrack to.
    pub backtrack_to_step: usize,

    /// Why that step was chosen.
    #[serde(default)]
    pub reason: String,

    /// Suggested changes for the next attempt.
    #[serde(default)]
    pub suggested_improvements: Vec<String>,
}

/// Turns a page description into ranked candidate actions.
#[async_trait]
pub trait ActionProposer: Send + Sync {
    /// Proposes at most `request.branching_factor` candidates, best first.
    async fn propose(&self, request: ProposalRequest<'_>) -> CollaboratorResult<Vec<CandidateAction>>;
}

/// Rates a trajectory against the goal.
#[async_trait]
pub trait TrajectoryScorer: Send + Sync {
    /// Scores `trajectory`; `screenshot` is the latest capture, when available.
    async fn score(
        &self,
        trajectory: &[TrajectoryStep],
        goal: &str,
        screenshot: Option<&[u8]>,
    ) -> CollaboratorResult<ScoreReport>;
}

/// Decides whether a trajectory has reached the goal.
#[async_trait]
pub trait GoalFinishedChecker: Send + Sync {
    /// Returns the verdict with a confidence.
    async fn is_finished(
        &self,
        trajectory: &[TrajectoryStep],
        goal: &str,
        screenshot: Option<&[u8]>,
    ) -> CollaboratorResult<GoalAssessment>;
}

/// Executes actions against a browser session.
///
/// A session is a single shared mutable resource; the engine resets it at
/// the start of every replay and never interleaves two operations on it.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Tears down any previous session and opens a fresh one at the start page.
    async fn reset_session(&self) -> CollaboratorResult<SessionHandle>;

    /// Executes one action; `Ok(false)` means the action could not run.
    async fn execute(
        &self,
        session: &SessionHandle,
        action: &str,
        target: Option<&ElementRef>,
    ) -> CollaboratorResult<bool>;

    /// Resolves the element an action refers to, if any.
    async fn resolve_element(
        &self,
        session: &SessionHandle,
        action: &str,
    ) -> CollaboratorResult<Option<ElementRef>>;

    /// Captures the current page state.
    async fn observe(&self, session: &SessionHandle) -> CollaboratorResult<Observation>;
}

/// Describes the page state after an action.
#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    /// Returns a natural-language description of what `action_description` did.
    async fn feedback(
        &self,
        session: &SessionHandle,
        goal: &str,
        action_description: &str,
    ) -> CollaboratorResult<String>;
}

/// Language-model assistant used by reflective MCTS.
#[async_trait]
pub trait PathAdvisor: Send + Sync {
    /// Picks the index of the most promising child.
    async fn select_child(
        &self,
        goal: &str,
        trajectory: &[TrajectoryStep],
        children: &[ChildSummary],
    ) -> CollaboratorResult<usize>;

    /// Suggests where to backtrack after a poor score.
    async fn reflect(
        &self,
        goal: &str,
        trajectory: &[TrajectoryStep],
        score: f64,
    ) -> CollaboratorResult<Reflection>;
}

/// The set of collaborator handles injected into the engine.
#[derive(Clone)]
pub struct Collaborators {
    /// Candidate action source.
    pub proposer: Arc<dyn ActionProposer>,
    /// Trajectory scorer.
    pub scorer: Arc<dyn TrajectoryScorer>,
    /// Goal-finished checker used by rollouts.
    pub goal_checker: Arc<dyn GoalFinishedChecker>,
    /// Browser driver.
    pub browser: Arc<dyn BrowserDriver>,
    /// Post-action feedback source.
    pub feedback: Arc<dyn FeedbackProvider>,
    /// Selection and reflection assistant for reflective MCTS.
    pub advisor: Option<Arc<dyn PathAdvisor>>,
}

impl Collaborators {
    /// Bundles the required collaborators; the advisor starts out absent.
    pub fn new(
        proposer: Arc<dyn ActionProposer>,
        scorer: Arc<dyn TrajectoryScorer>,
        goal_checker: Arc<dyn GoalFinishedChecker>,
        browser: Arc<dyn BrowserDriver>,
        feedback: Arc<dyn FeedbackProvider>,
    ) -> Self {
        Collaborators {
            proposer,
            scorer,
            goal_checker,
            browser,
            feedback,
            advisor: None,
        }
    }

    /// Sets the reflective MCTS advisor.
    pub fn with_advisor(mut self, advisor: Arc<dyn PathAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("has_advisor", &self.advisor.is_some())
            .finish()
    }
}
