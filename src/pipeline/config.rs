//! Serializable pipeline configuration.

use crate::compare::{AggregationPolicy, DEFAULT_ALPHA};
use crate::data::Population;
use crate::error::{ImmunoError, Result};
use crate::filter::CohortCriteria;
use crate::model::ForestConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How responders and non-responders are compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Cohort restricting the filtered comparison.
    pub cohort: CohortCriteria,
    pub policy: AggregationPolicy,
    pub alpha: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            cohort: CohortCriteria::any()
                .sample_type("PBMC")
                .condition("melanoma")
                .treatment("miraclib"),
            policy: AggregationPolicy::PerSubject,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// A named mean-count question over one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanCountQuery {
    pub name: String,
    pub criteria: CohortCriteria,
    pub population: Population,
}

/// Pipeline configuration for serialization.
///
/// Every field has a default, so a YAML document only needs the settings it
/// changes.
///
/// ```
/// use immunoprofile::pipeline::PipelineConfig;
///
/// let config = PipelineConfig::from_yaml("name: trial\ncv_folds: 5\n").unwrap();
/// assert_eq!(config.cv_folds, Some(5));
/// assert_eq!(config.forest.n_trees, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Database file; in-memory when absent.
    pub database: Option<PathBuf>,
    pub comparison: ComparisonConfig,
    /// Cohort whose project, response and sex breakdown is reported.
    pub reporting_cohort: CohortCriteria,
    /// Cohort whose subjects train the classifier.
    pub training_cohort: CohortCriteria,
    pub forest: ForestConfig,
    /// Run k-fold cross-validation of the classifier when set.
    pub cv_folds: Option<usize>,
    pub mean_counts: Vec<MeanCountQuery>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let baseline = CohortCriteria::new("PBMC", 0, "melanoma", "miraclib");
        Self {
            name: "unnamed".to_string(),
            description: None,
            database: None,
            comparison: ComparisonConfig::default(),
            reporting_cohort: baseline,
            training_cohort: CohortCriteria::any()
                .sample_type("PBMC")
                .condition("melanoma")
                .treatment("miraclib"),
            forest: ForestConfig::default(),
            cv_folds: None,
            mean_counts: vec![MeanCountQuery {
                name: "male_responder_baseline_b_cell".to_string(),
                criteria: CohortCriteria::any()
                    .timepoint(0)
                    .condition("melanoma")
                    .sex(crate::data::Sex::Male)
                    .response(crate::data::Response::Yes),
                population: Population::BCell,
            }],
        }
    }
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(ImmunoError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ImmunoError::from)
    }

    /// Reject settings that would fail partway through a run.
    pub fn validate(&self) -> Result<()> {
        if !(self.comparison.alpha > 0.0 && self.comparison.alpha < 1.0) {
            return Err(ImmunoError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {}",
                self.comparison.alpha
            )));
        }
        if let Some(folds) = self.cv_folds {
            if folds < 2 {
                return Err(ImmunoError::InvalidParameter(format!(
                    "cv_folds must be at least 2, got {}",
                    folds
                )));
            }
        }
        self.forest.validate()
    }
}
