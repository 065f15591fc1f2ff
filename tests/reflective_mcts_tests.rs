mod common;

use arboriter_lats::{
    config::SearchAlgorithm, strategy::reflective::backtrack_len, tree::TerminalReason,
    SearchConfig, SearchEngine, SearchEvent, SearchStatus,
};
use common::{
    candidate, collaborators, init_logging, FakeBrowser, RecordingReporter, ScriptedAdvisor,
    ScriptedProposer, ScriptedScorer,
};

fn config(iterations: usize, max_depth: usize) -> SearchConfig {
    SearchConfig::default()
        .with_algorithm(SearchAlgorithm::ReflectiveMcts)
        .with_iterations(iterations)
        .with_max_depth(max_depth)
        .with_tree_updates(false)
}

#[test]
fn test_backtrack_len() {
    assert_eq!(backtrack_len(3, 0), Some(2), "never back to the bare root");
    assert_eq!(backtrack_len(3, 1), Some(2));
    assert_eq!(backtrack_len(3, 2), Some(3));
    assert_eq!(backtrack_len(4, 1), Some(2));
    assert_eq!(backtrack_len(3, 3), None, "step outside the path");
    assert_eq!(backtrack_len(1, 0), Some(1));

    for len in 2..8 {
        for step in 0..len {
            let kept = backtrack_len(len, step).unwrap();
            assert!(kept >= 2, "a path with actions keeps at least one ({len}, {step})");
            assert!(kept <= len);
        }
    }
}

#[tokio::test]
async fn test_fallback_when_nothing_scores() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![]);
    let reporter = RecordingReporter::shared();

    let mut engine = SearchEngine::new(
        "goal",
        config(5, 3),
        collaborators(proposer, ScriptedScorer::constant(0.9), FakeBrowser::new().shared()),
    )
    .with_reporter(reporter.clone());
    let outcome = engine.search().await.unwrap();

    assert_eq!(outcome.status, SearchStatus::Failure);
    assert_eq!(outcome.best_node, None);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(outcome.actions[0].action, "refresh()");
    assert_eq!(outcome.actions[0].description, "Retry with different approach");
    assert_eq!(outcome.statistics.iterations, 1, "the root became terminal");

    let skipped = reporter.events().into_iter().any(|event| {
        matches!(event, SearchEvent::Reflection { skipped: true, .. })
    });
    assert!(skipped, "without an advisor reflection is skipped");
}

#[tokio::test]
async fn test_advisor_guided_path() {
    init_logging();
    let proposer = ScriptedProposer::new(|trajectory| {
        let depth = trajectory.len();
        Ok(vec![
            candidate(&format!("step{depth}-a"), 0.6),
            candidate(&format!("step{depth}-b"), 0.4),
        ])
    });
    let scorer = ScriptedScorer::new(|trajectory| {
        let last = trajectory.last().map(|s| s.action.as_str()).unwrap_or("");
        Ok(if trajectory.len() == 2 && last.ends_with("-b") {
            0.9
        } else {
            0.3
        })
    });
    let advisor = ScriptedAdvisor::fixed(1, 0);

    let collaborators = collaborators(proposer, scorer, FakeBrowser::new().shared())
        .with_advisor(advisor.clone());
    let mut engine = SearchEngine::new("goal", config(5, 2), collaborators);
    let outcome = engine.search().await.unwrap();

    assert_eq!(outcome.status, SearchStatus::Success);
    assert_eq!(outcome.score, 0.9);
    let actions: Vec<_> = outcome.actions.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["step0-b", "step1-b"]);
    assert_eq!(advisor.reflections(), 2, "only the first two paths scored poorly");

    // Every iteration backpropagates through the whole path, root included
    let tree = engine.tree();
    let root = tree.root();
    let leaf = outcome.best_node.unwrap();
    let middle = tree[leaf].parent().unwrap();
    assert_eq!(tree[root].visits, 5);
    assert_eq!(tree[middle].visits, 4);
    assert_eq!(tree[leaf].visits, 3);
    assert!((tree[leaf].value - 0.9).abs() < 1e-12);
    assert!((tree[middle].value - 0.75).abs() < 1e-12, "mean of 0.3 and three 0.9s");
    assert!((tree[root].value - 0.6).abs() < 1e-12, "mean of 0, 0.3 and three 0.9s");
}

#[tokio::test]
async fn test_reflection_backtracks_but_keeps_first_action() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("scroll(down)", 0.5)]);
    let reporter = RecordingReporter::shared();
    let collaborators = collaborators(
        proposer,
        ScriptedScorer::constant(0.2),
        FakeBrowser::new().shared(),
    )
    .with_advisor(ScriptedAdvisor::fixed(0, 0));

    let mut engine = SearchEngine::new("goal", config(6, 4), collaborators)
        .with_reporter(reporter.clone());
    let outcome = engine.search().await.unwrap();

    let backtracks: Vec<_> = reporter
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SearchEvent::Backtracking { from_len, to_len } => Some((from_len, to_len)),
            _ => None,
        })
        .collect();
    assert!(
        backtracks.contains(&(3, 2)),
        "a three-node path backtracks to two, got {backtracks:?}"
    );
    assert!(backtracks.iter().all(|&(_, to)| to >= 2));

    assert_eq!(outcome.status, SearchStatus::PartialSuccess);
    assert_eq!(outcome.score, 0.2);
    assert_eq!(outcome.actions.len(), 1, "the first path to reach the best score wins");
}

#[tokio::test]
async fn test_uct_descent_without_advisor() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("click(1)", 0.5), candidate("click(2)", 0.5)]);
    let scorer = ScriptedScorer::new(|trajectory| {
        Ok(if trajectory.len() == 1 { 0.8 } else { 0.5 })
    });

    let mut engine = SearchEngine::new(
        "goal",
        config(3, 2),
        collaborators(proposer, scorer, FakeBrowser::new().shared()),
    );
    let outcome = engine.search().await.unwrap();

    assert_eq!(outcome.status, SearchStatus::Success);
    assert_eq!(outcome.score, 0.8);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(engine.tree()[engine.tree().root()].visits, 3);
}

#[tokio::test]
async fn test_path_moves_to_sibling_after_depth_bound() {
    init_logging();
    let proposer = ScriptedProposer::fixed(vec![candidate("click(1)", 0.5), candidate("click(2)", 0.5)]);
    let scorer = ScriptedScorer::new(|trajectory| {
        let last = trajectory.last().map(|s| s.action.as_str()).unwrap_or("");
        Ok(if last == "click(2)" { 0.9 } else { 0.3 })
    });

    let mut engine = SearchEngine::new(
        "goal",
        config(10, 1),
        collaborators(proposer, scorer.clone(), FakeBrowser::new().shared()),
    );
    let outcome = engine.search().await.unwrap();

    assert_eq!(outcome.status, SearchStatus::Success);
    assert_eq!(outcome.score, 0.9);
    let actions: Vec<_> = outcome.actions.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["click(2)"]);

    let tree = engine.tree();
    let root = tree.root();
    for &child in tree[root].children() {
        assert_eq!(tree[child].visits, 1, "{} is scored once", tree[child].label());
        assert_eq!(tree[child].terminal_reason(), Some(TerminalReason::MaxDepth));
    }
    assert_eq!(tree[root].terminal_reason(), Some(TerminalReason::ChildrenExhausted));
    assert_eq!(scorer.calls(), 2);
    assert_eq!(outcome.statistics.iterations, 3, "the search ends once both leaves are closed");
}
