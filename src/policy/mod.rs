//! Pluggable policies for the search
//!
//! - Selection policies: which child to descend into
//! - Backpropagation policies: how rewards update node statistics

pub mod backpropagation;
pub mod selection;

pub use backpropagation::{BackpropagationPolicy, StandardPolicy};
pub use selection::{SelectionPolicy, UctPolicy};
