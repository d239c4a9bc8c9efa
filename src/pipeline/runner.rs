//! Ordered execution of the load, summary, comparison, cohort and training
//! stages.

use super::config::{MeanCountQuery, PipelineConfig};
use crate::compare::{compare_groups_with_alpha, AggregationPolicy, ComparisonSet};
use crate::data::{read_records, CohortRow, Population, RawRecord, SummaryRow};
use crate::error::{ImmunoError, Result};
use crate::filter::{mean_count, response_frequencies, summarize_cohort, CohortCriteria, CohortSummary};
use crate::model::{
    cross_validate, subject_profiles, CrossValidation, ForestConfig, Prediction,
    ResponseClassifier,
};
use crate::store::{LoadReport, Store};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Answer to one [`MeanCountQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanCountResult {
    pub name: String,
    pub population: Population,
    /// `None` when no sample matched.
    pub mean: Option<f64>,
}

/// Everything a pipeline run produces for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub name: String,
    pub load: LoadReport,
    /// Derived summary table, in persisted order.
    pub summary: Vec<SummaryRow>,
    /// Comparison over every labeled sample.
    pub comparison_all: ComparisonSet,
    /// Comparison restricted to the configured comparison cohort.
    pub comparison: ComparisonSet,
    pub cohort: CohortSummary,
    pub mean_counts: Vec<MeanCountResult>,
    /// Absent when the training cohort lacks either response class.
    pub classifier: Option<ResponseClassifier>,
    pub cross_validation: Option<CrossValidation>,
}

impl AnalysisReport {
    /// Predict response for one sample's raw counts.
    pub fn predict(&self, raw_counts: &HashMap<String, f64>) -> Result<Prediction> {
        self.classifier
            .as_ref()
            .ok_or_else(|| ImmunoError::Pipeline("no classifier was trained".to_string()))?
            .predict(raw_counts)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for configuring and running the analysis.
///
/// # Example
///
/// ```no_run
/// use immunoprofile::prelude::*;
///
/// let report = Pipeline::new()
///     .name("miraclib")
///     .database("subjects.db")
///     .aggregation(AggregationPolicy::PerSubject)
///     .cross_validate(5)
///     .run_file("cell-count.csv")
///     .unwrap();
/// println!("{}", report.comparison);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with default settings and an in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    /// Persist to a database file instead of memory.
    pub fn database<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.database = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.database = None;
        self
    }

    pub fn comparison_cohort(mut self, criteria: CohortCriteria) -> Self {
        self.config.comparison.cohort = criteria;
        self
    }

    pub fn aggregation(mut self, policy: AggregationPolicy) -> Self {
        self.config.comparison.policy = policy;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.config.comparison.alpha = alpha;
        self
    }

    pub fn reporting_cohort(mut self, criteria: CohortCriteria) -> Self {
        self.config.reporting_cohort = criteria;
        self
    }

    pub fn training_cohort(mut self, criteria: CohortCriteria) -> Self {
        self.config.training_cohort = criteria;
        self
    }

    pub fn forest(mut self, forest: ForestConfig) -> Self {
        self.config.forest = forest;
        self
    }

    /// Also estimate classifier accuracy with k-fold cross-validation.
    pub fn cross_validate(mut self, folds: usize) -> Self {
        self.config.cv_folds = Some(folds);
        self
    }

    /// Add a mean-count question to the report.
    pub fn mean_count(mut self, name: &str, criteria: CohortCriteria, population: Population) -> Self {
        self.config.mean_counts.push(MeanCountQuery {
            name: name.to_string(),
            criteria,
            population,
        });
        self
    }

    /// Export to config.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            description: description.map(String::from),
            ..self.config.clone()
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read a comma-delimited input file and run on its records.
    pub fn run_file<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisReport> {
        let records = read_records(path)?;
        self.run(&records)
    }

    /// Run every stage in order on `records`.
    ///
    /// The store is closed before returning, whether or not a stage failed.
    pub fn run(&self, records: &[RawRecord]) -> Result<AnalysisReport> {
        self.config.validate()?;

        let mut store = match &self.config.database {
            Some(path) => Store::open(path)?,
            None => Store::open_in_memory()?,
        };
        let outcome = self.execute(&mut store, records);
        let closed = store.close();

        let report = outcome?;
        closed?;
        Ok(report)
    }

    fn execute(&self, store: &mut Store, records: &[RawRecord]) -> Result<AnalysisReport> {
        let config = &self.config;
        let database = config
            .database
            .as_ref()
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        info!(
            pipeline = %config.name,
            %database,
            records = records.len(),
            "pipeline started"
        );

        store.initialize_schema()?;
        let load = store.load_records(records)?;

        let summary = store.refresh_summary()?;
        let rows: Vec<CohortRow> = store.cohort_rows()?;

        let comparison_all = compare_groups_with_alpha(
            &response_frequencies(&summary, &rows, &CohortCriteria::any()),
            config.comparison.policy,
            config.comparison.alpha,
        )?;
        let comparison = compare_groups_with_alpha(
            &response_frequencies(&summary, &rows, &config.comparison.cohort),
            config.comparison.policy,
            config.comparison.alpha,
        )?;

        let cohort = summarize_cohort(&rows, &config.reporting_cohort);
        info!(
            samples = cohort.samples.len(),
            subjects = cohort.n_subjects,
            "reporting cohort summarized"
        );

        let mean_counts = config
            .mean_counts
            .iter()
            .map(|q| MeanCountResult {
                name: q.name.clone(),
                population: q.population,
                mean: mean_count(&rows, &q.criteria, q.population),
            })
            .collect();

        let profiles = subject_profiles(&rows, &config.training_cohort);
        let classifier = match ResponseClassifier::train(&profiles, &config.forest) {
            Ok(classifier) => Some(classifier),
            Err(ImmunoError::EmptyData(reason)) | Err(ImmunoError::InvalidParameter(reason)) => {
                warn!(subjects = profiles.len(), %reason, "classifier not trained");
                None
            }
            Err(e) => return Err(e),
        };

        let cross_validation = match (config.cv_folds, &classifier) {
            (Some(folds), Some(_)) => match cross_validate(&profiles, folds, &config.forest) {
                Ok(cv) => Some(cv),
                Err(ImmunoError::InvalidParameter(reason)) => {
                    warn!(folds, %reason, "cross-validation skipped");
                    None
                }
                Err(e) => return Err(e),
            },
            _ => None,
        };

        info!(pipeline = %config.name, "pipeline finished");

        Ok(AnalysisReport {
            name: config.name.clone(),
            load,
            summary,
            comparison_all,
            comparison,
            cohort,
            mean_counts,
            classifier,
            cross_validation,
        })
    }
}
