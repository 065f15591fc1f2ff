mod common;

use std::time::Duration;

use arboriter_lats::{
    config::SearchAlgorithm, tree::TerminalReason, SearchConfig, SearchEngine, SearchEvent,
    SearchStatus,
};
use common::{
    candidate, collaborators, init_logging, FakeBrowser, RecordingReporter, ScriptedProposer,
    ScriptedScorer,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancelled_before_start() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("click(1)", 0.9)]);
    let browser = FakeBrowser::new().shared();

    let mut engine = SearchEngine::new(
        "goal",
        SearchConfig::default(),
        collaborators(proposer.clone(), ScriptedScorer::constant(1.0), browser.clone()),
    );
    engine.cancellation_token().cancel();
    let outcome = engine.search().await.unwrap();

    assert!(outcome.statistics.stopped_early);
    assert_eq!(outcome.statistics.iterations, 0);
    assert_eq!(outcome.status, SearchStatus::Failure);
    assert_eq!(browser.resets(), 0, "no collaborator is called after cancellation");
    assert_eq!(proposer.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_search_keeps_partial_tree() {
    init_logging();
    for algorithm in [
        SearchAlgorithm::Bfs,
        SearchAlgorithm::Dfs,
        SearchAlgorithm::ReflectiveMcts,
        SearchAlgorithm::Lats,
    ] {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let proposer = ScriptedProposer::new(move |_| {
            trigger.cancel();
            Ok(vec![candidate("click(1)", 0.9), candidate("click(2)", 0.5)])
        });
        let scorer = ScriptedScorer::constant(1.0);

        let mut engine = SearchEngine::new(
            "goal",
            SearchConfig::default().with_algorithm(algorithm),
            collaborators(proposer.clone(), scorer.clone(), FakeBrowser::new().shared()),
        )
        .with_cancellation(token);
        let outcome = engine.search().await.unwrap();

        assert!(outcome.statistics.stopped_early, "{algorithm} stops early");
        assert_eq!(proposer.calls(), 1, "{algorithm} makes no call after cancelling");
        assert_eq!(scorer.calls(), 0, "{algorithm} scores nothing");
        assert!(
            !engine.tree()[engine.tree().root()].is_terminal(),
            "{algorithm}: an interrupted expansion marks nothing terminal"
        );
    }
}

#[tokio::test]
async fn test_time_budget_stops_search() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("click(1)", 0.9)]);

    let mut engine = SearchEngine::new(
        "goal",
        SearchConfig::default().with_max_time(Duration::ZERO),
        collaborators(proposer.clone(), ScriptedScorer::constant(1.0), FakeBrowser::new().shared()),
    );
    let outcome = engine.search().await.unwrap();

    assert!(outcome.statistics.stopped_early);
    assert_eq!(proposer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_action_times_out() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("click(1)", 0.9)]);
    let scorer = ScriptedScorer::constant(1.0);
    let browser = FakeBrowser::new().slow(Duration::from_secs(3600)).shared();
    let reporter = RecordingReporter::shared();

    let config = SearchConfig::default()
        .with_algorithm(SearchAlgorithm::Bfs)
        .with_max_depth(2)
        .with_action_timeout(Duration::from_millis(500));
    let mut engine = SearchEngine::new(
        "goal",
        config,
        collaborators(proposer, scorer.clone(), browser),
    )
    .with_reporter(reporter.clone());
    let outcome = engine.search().await.unwrap();

    let tree = engine.tree();
    let child = tree[tree.root()].children()[0];
    assert_eq!(tree[child].terminal_reason(), Some(TerminalReason::ReplayFailed));
    assert_eq!(outcome.statistics.replay_failures, 1);
    assert!(!outcome.statistics.stopped_early, "a timeout is not a cancellation");
    assert_eq!(scorer.calls(), 0);
    assert_eq!(outcome.status, SearchStatus::Failure);
    assert!(reporter
        .events()
        .iter()
        .any(|e| matches!(e, SearchEvent::NodeTerminal { reason: TerminalReason::ReplayFailed, .. })));
}
