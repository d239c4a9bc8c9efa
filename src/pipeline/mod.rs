//! Pipeline composition and execution.

mod config;
mod runner;

pub use config::{ComparisonConfig, MeanCountQuery, PipelineConfig};
pub use runner::{AnalysisReport, MeanCountResult, Pipeline};
