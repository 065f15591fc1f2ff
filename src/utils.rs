//! Utility functions for the search engine
//!
//! This module contains the small pieces of arithmetic shared by the
//! selection and backpropagation policies.

use crate::config::UnvisitedScore;

/// Calculates the exploitation term for UCT
///
/// The node's stored value divided by its visit count.
pub fn exploitation_term(value: f64, visits: u64) -> f64 {
    if visits == 0 {
        return 0.0;
    }
    value / visits as f64
}

/// Calculates the exploration term for UCT
///
/// Returns zero while the parent has never been visited, which happens for
/// children of a root that is excluded from backpropagation.
pub fn exploration_term(parent_visits: u64, child_visits: u64, exploration_weight: f64) -> f64 {
    if child_visits == 0 {
        return f64::INFINITY;
    }
    if parent_visits == 0 {
        return 0.0;
    }

    exploration_weight * ((parent_visits as f64).ln() / child_visits as f64).sqrt()
}

/// Calculates the UCT value for a node
///
/// With the default weight of `sqrt(2)` this is
/// `value / visits + sqrt(2 * ln(parent_visits) / visits)`.
pub fn uct_value(
    value: f64,
    visits: u64,
    parent_visits: u64,
    exploration_weight: f64,
    unvisited: UnvisitedScore,
) -> f64 {
    if visits == 0 {
        return match unvisited {
            UnvisitedScore::Infinity => f64::INFINITY,
            UnvisitedScore::Value => value,
        };
    }

    exploitation_term(value, visits) + exploration_term(parent_visits, visits, exploration_weight)
}

/// Folds one more observation into a running average
///
/// `visits` is the count *including* the new observation.
pub fn running_average(previous: f64, visits: u64, observation: f64) -> f64 {
    if visits == 0 {
        return previous;
    }
    (previous * (visits - 1) as f64 + observation) / visits as f64
}

/// Clamps a collaborator-provided score into `[0, 1]`
///
/// Returns `None` for NaN or infinite input.
pub fn normalize_score(score: f64) -> Option<f64> {
    if !score.is_finite() {
        return None;
    }
    Some(score.clamp(0.0, 1.0))
}
