//! Backpropagation policies
//!
//! Backpropagation policies determine how a node's statistics change when a
//! reward is pushed back through it.

use crate::{tree::Node, utils};

/// Trait for policies that backpropagate rewards
pub trait BackpropagationPolicy: Send + Sync {
    /// Updates statistics for a node based on an observed reward
    fn update_stats(&self, node: &mut Node, reward: f64);

    /// Create a boxed clone of this policy
    fn clone_box(&self) -> Box<dyn BackpropagationPolicy>;
}

/// Standard backpropagation policy
///
/// Increments the visit count and folds the reward into the node's running
/// average, so after rewards `r1..rn` the node holds `n` visits and
/// `value == mean(r1..rn)`.
#[derive(Debug, Clone)]
pub struct StandardPolicy;

impl StandardPolicy {
    /// Creates a new standard policy
    pub fn new() -> Self {
        StandardPolicy
    }
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpropagationPolicy for StandardPolicy {
    fn update_stats(&self, node: &mut Node, reward: f64) {
        node.visits += 1;
        node.value = utils::running_average(node.value, node.visits, reward);
    }

    fn clone_box(&self) -> Box<dyn BackpropagationPolicy> {
        Box::new(self.clone())
    }
}

impl BackpropagationPolicy for Box<dyn BackpropagationPolicy> {
    fn update_stats(&self, node: &mut Node, reward: f64) {
        (**self).update_stats(node, reward)
    }

    fn clone_box(&self) -> Box<dyn BackpropagationPolicy> {
        (**self).clone_box()
    }
}
