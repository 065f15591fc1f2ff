use arboriter_lats::{
    collaborators::CandidateAction,
    policy::{BackpropagationPolicy, StandardPolicy},
    utils, SearchTree,
};

#[test]
fn test_standard_policy() {
    let mut tree = SearchTree::new("goal");
    let root = tree.root();
    let policy = StandardPolicy::new();

    // Initial state
    assert_eq!(tree[root].visits, 0);
    assert_eq!(tree[root].value, 0.0);

    // Update once
    policy.update_stats(&mut tree[root], 0.5);
    assert_eq!(tree[root].visits, 1);
    assert_eq!(tree[root].value, 0.5);

    // Update again
    policy.update_stats(&mut tree[root], 1.0);
    assert_eq!(tree[root].visits, 2);
    assert_eq!(tree[root].value, 0.75);
}

#[test]
fn test_value_is_mean_of_rewards() {
    let mut tree = SearchTree::new("goal");
    let child = tree.add_child(tree.root(), CandidateAction::new("click(1)", "", 0.5), None);
    let policy = StandardPolicy::default();

    let rewards = [0.2, 0.9, 0.0, 0.4, 1.0, 0.35];
    for reward in rewards {
        policy.update_stats(&mut tree[child], reward);
    }

    let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
    assert_eq!(tree[child].visits, rewards.len() as u64);
    assert!(
        (tree[child].value - mean).abs() < 1e-12,
        "value {} should equal the mean {}",
        tree[child].value,
        mean
    );
}

#[test]
fn test_running_average() {
    assert_eq!(utils::running_average(0.0, 1, 0.8), 0.8);
    assert!((utils::running_average(0.8, 2, 0.4) - 0.6).abs() < 1e-12);
    assert_eq!(utils::running_average(0.3, 0, 1.0), 0.3, "no visits leaves the value alone");
}

#[test]
fn test_boxed_policy_forwards() {
    let mut tree = SearchTree::new("goal");
    let root = tree.root();
    let boxed: Box<dyn BackpropagationPolicy> = Box::new(StandardPolicy::new());

    boxed.clone_box().update_stats(&mut tree[root], 1.0);
    assert_eq!(tree[root].visits, 1);
    assert_eq!(tree[root].value, 1.0);
}
