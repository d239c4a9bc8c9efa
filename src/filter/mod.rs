//! Cohort selection over joined sample and subject rows.

pub mod cohort;

pub use cohort::{
    aggregate_by, filter_cohort, mean_count, response_frequencies, summarize_cohort,
    AggregateColumn, CohortCriteria, CohortSummary,
};
