//! Immune Cell Profiling Library
//!
//! This library loads per-sample immune cell counts into a relational store,
//! derives per-population relative frequencies, compares responders against
//! non-responders and trains a treatment-response classifier.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (records, populations, summary rows)
//! - **store**: SQLite schema, loading and read-back
//! - **filter**: Cohort selection and cross-tabulation
//! - **test**: Hypothesis testing (Mann-Whitney U)
//! - **compare**: Per-population responder comparison
//! - **model**: Random forest response classifier
//! - **pipeline**: Pipeline composition and execution
//!
//! # Example
//!
//! ```no_run
//! use immunoprofile::prelude::*;
//! use std::collections::HashMap;
//!
//! let report = Pipeline::new()
//!     .database("subjects.db")
//!     .aggregation(AggregationPolicy::PerSubject)
//!     .run_file("cell-count.csv")
//!     .unwrap();
//!
//! for result in report.comparison.iter() {
//!     println!("{}: p = {:?}", result.population, result.p_value);
//! }
//!
//! let sample: HashMap<String, f64> = [
//!     ("b_cell", 10000.0),
//!     ("cd8_t_cell", 21000.0),
//!     ("cd4_t_cell", 37000.0),
//!     ("nk_cell", 14000.0),
//!     ("monocyte", 13000.0),
//! ]
//! .into_iter()
//! .map(|(k, v)| (k.to_string(), v))
//! .collect();
//! let prediction = report.predict(&sample).unwrap();
//! println!("{:?} ({}%)", prediction.label, prediction.confidence);
//! ```

pub mod compare;
pub mod data;
pub mod error;
pub mod filter;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::compare::{
        compare_groups, compare_groups_with_alpha, AggregationPolicy, ComparisonResult,
        ComparisonSet, Significance,
    };
    pub use crate::data::{
        compute_summary, parse_records, percentage_features, read_records,
        read_records_with_delimiter, safe_percentage, CellCounts, CohortRow, Population,
        RawRecord, Response, ResponseFrequency, Sample, Sex, Subject, SummaryRow,
    };
    pub use crate::error::{ImmunoError, Result};
    pub use crate::filter::{
        aggregate_by, filter_cohort, mean_count, response_frequencies, summarize_cohort,
        AggregateColumn, CohortCriteria, CohortSummary,
    };
    pub use crate::model::{
        cross_validate, subject_profiles, CrossValidation, ForestConfig, Prediction,
        RandomForest, ResponseClassifier, SubjectProfile,
    };
    pub use crate::pipeline::{AnalysisReport, Pipeline, PipelineConfig};
    pub use crate::store::{LoadReport, SkippedRecord, Store};
    pub use crate::test::{mann_whitney_u, MannWhitneyMethod, MannWhitneyResult};
}
