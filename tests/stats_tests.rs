use std::time::Duration;

use arboriter_lats::SearchStatistics;

#[test]
fn test_new_statistics() {
    let stats = SearchStatistics::new();

    assert_eq!(stats.iterations, 0);
    assert_eq!(stats.tree_size, 1, "the root is counted");
    assert_eq!(stats.avg_time_per_iteration_ms(), 0.0);
    assert_eq!(stats.collaborator_failures(), 0);
    assert!(!stats.stopped_early);
}

#[test]
fn test_summary_reports_failures_and_timing() {
    let stats = SearchStatistics {
        iterations: 4,
        total_time: Duration::from_millis(200),
        replay_failures: 1,
        scorer_failures: 2,
        ..SearchStatistics::default()
    };

    assert_eq!(stats.avg_time_per_iteration_ms(), 50.0);
    assert_eq!(stats.collaborator_failures(), 3);

    let summary = stats.summary();
    assert!(summary.contains("Iterations: 4"));
    assert!(summary.contains("Avg time per iteration: 50.0 ms"));
    assert!(summary.contains("Failures: 3 (1 replay, 0 proposer, 2 scorer)"));
}
