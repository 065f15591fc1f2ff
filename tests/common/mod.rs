//! Scripted collaborators shared by the integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arboriter_lats::collaborators::{
    ActionProposer, BrowserDriver, CandidateAction, ChildSummary, CollaboratorError,
    CollaboratorResult, Collaborators, ElementRef, FeedbackProvider, GoalAssessment,
    GoalFinishedChecker, Observation, PathAdvisor, ProposalRequest, Reflection, ScoreReport,
    SessionHandle, TrajectoryScorer, TrajectoryStep,
};
use arboriter_lats::progress::{ProgressEvent, ProgressReporter, SearchEvent};
use async_trait::async_trait;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn candidate(action: &str, probability: f64) -> CandidateAction {
    CandidateAction::new(action, format!("do {action}"), probability)
}

type ProposeFn =
    dyn Fn(&[TrajectoryStep]) -> CollaboratorResult<Vec<CandidateAction>> + Send + Sync;

/// Proposer answering from a closure over the trajectory
pub struct ScriptedProposer {
    script: Box<ProposeFn>,
    calls: AtomicUsize,
}

impl ScriptedProposer {
    pub fn new(
        script: impl Fn(&[TrajectoryStep]) -> CollaboratorResult<Vec<CandidateAction>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedProposer {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always proposes the same candidates
    pub fn fixed(candidates: Vec<CandidateAction>) -> Arc<Self> {
        Self::new(move |_| Ok(candidates.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionProposer for ScriptedProposer {
    async fn propose(
        &self,
        request: ProposalRequest<'_>,
    ) -> CollaboratorResult<Vec<CandidateAction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(request.trajectory)
    }
}

type ScoreFn = dyn Fn(&[TrajectoryStep]) -> CollaboratorResult<f64> + Send + Sync;

/// Scorer answering from a closure over the trajectory
pub struct ScriptedScorer {
    script: Box<ScoreFn>,
    calls: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new(
        script: impl Fn(&[TrajectoryStep]) -> CollaboratorResult<f64> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedScorer {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn constant(score: f64) -> Arc<Self> {
        Self::new(move |_| Ok(score))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrajectoryScorer for ScriptedScorer {
    async fn score(
        &self,
        trajectory: &[TrajectoryStep],
        _goal: &str,
        _screenshot: Option<&[u8]>,
    ) -> CollaboratorResult<ScoreReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(trajectory).map(ScoreReport::overall)
    }
}

type GoalFn = dyn Fn(&[TrajectoryStep]) -> CollaboratorResult<GoalAssessment> + Send + Sync;

/// Goal checker answering from a closure over the trajectory
pub struct ScriptedGoalChecker {
    script: Box<GoalFn>,
    calls: AtomicUsize,
}

impl ScriptedGoalChecker {
    pub fn new(
        script: impl Fn(&[TrajectoryStep]) -> CollaboratorResult<GoalAssessment>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedGoalChecker {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn never() -> Arc<Self> {
        Self::new(|_| {
            Ok(GoalAssessment {
                finished: false,
                confidence: 0.0,
            })
        })
    }

    /// Finished with `confidence` once the trajectory holds `len` actions
    pub fn at_length(len: usize, confidence: f64) -> Arc<Self> {
        Self::new(move |trajectory| {
            Ok(GoalAssessment {
                finished: trajectory.len() >= len,
                confidence,
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GoalFinishedChecker for ScriptedGoalChecker {
    async fn is_finished(
        &self,
        trajectory: &[TrajectoryStep],
        _goal: &str,
        _screenshot: Option<&[u8]>,
    ) -> CollaboratorResult<GoalAssessment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(trajectory)
    }
}

/// In-memory browser that records every executed action
#[derive(Default)]
pub struct FakeBrowser {
    resets: AtomicUsize,
    executed: Mutex<Vec<String>>,
    failing: HashSet<String>,
    unavailable: bool,
    execute_delay: Option<Duration>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions that report `Ok(false)` when executed
    pub fn failing_on(mut self, actions: &[&str]) -> Self {
        self.failing = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Session resets fail
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Every execution sleeps for `delay` first
    pub fn slow(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn reset_session(&self) -> CollaboratorResult<SessionHandle> {
        let n = self.resets.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unavailable {
            return Err(CollaboratorError::failed("browser is not reachable"));
        }
        Ok(SessionHandle {
            id: format!("session-{n}"),
            live_url: None,
        })
    }

    async fn execute(
        &self,
        _session: &SessionHandle,
        action: &str,
        _target: Option<&ElementRef>,
    ) -> CollaboratorResult<bool> {
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.executed.lock().unwrap().push(action.to_string());
        Ok(!self.failing.contains(action))
    }

    async fn resolve_element(
        &self,
        _session: &SessionHandle,
        action: &str,
    ) -> CollaboratorResult<Option<ElementRef>> {
        Ok(Some(ElementRef {
            selector: format!("[data-action=\"{action}\"]"),
            ..Default::default()
        }))
    }

    async fn observe(&self, _session: &SessionHandle) -> CollaboratorResult<Observation> {
        Ok(Observation {
            text: "<page/>".to_string(),
            screenshot: Some(vec![0x89, 0x50, 0x4e, 0x47]),
        })
    }
}

/// Feedback that echoes the action description
pub struct EchoFeedback;

#[async_trait]
impl FeedbackProvider for EchoFeedback {
    async fn feedback(
        &self,
        _session: &SessionHandle,
        _goal: &str,
        action_description: &str,
    ) -> CollaboratorResult<String> {
        Ok(format!("after {action_description}"))
    }
}

type SelectFn = dyn Fn(&[ChildSummary]) -> CollaboratorResult<usize> + Send + Sync;
type ReflectFn = dyn Fn(&[TrajectoryStep], f64) -> CollaboratorResult<Reflection> + Send + Sync;

/// Advisor answering from closures
pub struct ScriptedAdvisor {
    select: Box<SelectFn>,
    reflect: Box<ReflectFn>,
    reflections: AtomicUsize,
}

impl ScriptedAdvisor {
    pub fn new(
        select: impl Fn(&[ChildSummary]) -> CollaboratorResult<usize> + Send + Sync + 'static,
        reflect: impl Fn(&[TrajectoryStep], f64) -> CollaboratorResult<Reflection>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedAdvisor {
            select: Box::new(select),
            reflect: Box::new(reflect),
            reflections: AtomicUsize::new(0),
        })
    }

    /// Always picks child `index` and always backtracks to `step`
    pub fn fixed(index: usize, step: usize) -> Arc<Self> {
        Self::new(
            move |_| Ok(index),
            move |_, _| {
                Ok(Reflection {
                    backtrack_to_step: step,
                    reason: "the last step did not help".to_string(),
                    suggested_improvements: vec!["try another control".to_string()],
                })
            },
        )
    }

    pub fn reflections(&self) -> usize {
        self.reflections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PathAdvisor for ScriptedAdvisor {
    async fn select_child(
        &self,
        _goal: &str,
        _trajectory: &[TrajectoryStep],
        children: &[ChildSummary],
    ) -> CollaboratorResult<usize> {
        (self.select)(children)
    }

    async fn reflect(
        &self,
        _goal: &str,
        trajectory: &[TrajectoryStep],
        score: f64,
    ) -> CollaboratorResult<Reflection> {
        self.reflections.fetch_add(1, Ordering::SeqCst);
        (self.reflect)(trajectory, score)
    }
}

/// Keeps every event it receives
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SearchEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    /// Serialized `type` tag of every event, in order
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| {
                serde_json::to_value(event).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Collaborators with a never-finished goal checker and echo feedback
pub fn collaborators(
    proposer: Arc<ScriptedProposer>,
    scorer: Arc<ScriptedScorer>,
    browser: Arc<FakeBrowser>,
) -> Collaborators {
    Collaborators::new(
        proposer,
        scorer,
        ScriptedGoalChecker::never(),
        browser,
        Arc::new(EchoFeedback),
    )
}
