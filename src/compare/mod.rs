//! Responder vs. non-responder comparison of population percentages.

pub mod groups;
pub mod result;

pub use groups::{compare_groups, compare_groups_with_alpha, DEFAULT_ALPHA, MIN_GROUP_SIZE};
pub use result::{AggregationPolicy, ComparisonResult, ComparisonSet, Significance};
