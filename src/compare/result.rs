//! Result types for responder vs. non-responder comparisons.

use crate::data::Population;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// How repeated samples of one subject enter the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Every sample is one observation.
    PerSample,
    /// Samples are averaged within each subject first, giving one observation
    /// per subject.
    #[default]
    PerSubject,
}

/// Outcome of the hypothesis test for one population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Significant,
    NotSignificant,
    /// A group had too few observations to run the test.
    Undefined,
}

impl Significance {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Significant => "yes",
            Self::NotSignificant => "no",
            Self::Undefined => "undefined",
        }
    }
}

/// Comparison of one population's percentages between responders and
/// non-responders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub population: Population,
    /// Observations in the responder group.
    pub n_yes: usize,
    /// Observations in the non-responder group.
    pub n_no: usize,
    pub median_yes: Option<f64>,
    pub median_no: Option<f64>,
    pub mean_yes: Option<f64>,
    pub mean_no: Option<f64>,
    /// `median_yes - median_no`.
    pub median_difference: Option<f64>,
    /// Mann-Whitney U of the responder group.
    pub u_statistic: Option<f64>,
    /// Two-sided p-value, uncorrected for multiple populations.
    pub p_value: Option<f64>,
    /// Rank-biserial correlation `1 - 2U / (n_yes * n_no)`.
    pub effect_size: Option<f64>,
    pub significance: Significance,
}

impl ComparisonResult {
    /// Check if this result is significant at the threshold it was tested with.
    pub fn is_significant(&self) -> bool {
        self.significance == Significance::Significant
    }

    /// Whether the test could be run at all.
    pub fn is_defined(&self) -> bool {
        self.significance != Significance::Undefined
    }
}

/// Collection of per-population comparison results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSet {
    pub policy: AggregationPolicy,
    /// Significance threshold applied to raw p-values.
    pub alpha: f64,
    /// Results in first-seen population order.
    pub results: Vec<ComparisonResult>,
}

impl ComparisonSet {
    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result for one population.
    pub fn get(&self, population: Population) -> Option<&ComparisonResult> {
        self.results.iter().find(|r| r.population == population)
    }

    /// Results flagged significant.
    pub fn significant(&self) -> Vec<&ComparisonResult> {
        self.results.iter().filter(|r| r.is_significant()).collect()
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter()
    }

    /// Serialize to a JSON string for the presentation layer.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write results to TSV file.
    ///
    /// Undefined values are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "population\tn_yes\tn_no\tmedian_yes\tmedian_no\tmedian_difference\tmean_yes\tmean_no\tu_statistic\tp_value\teffect_size\tsignificant"
        )?;

        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.population,
                r.n_yes,
                r.n_no,
                fmt_opt(r.median_yes, 5),
                fmt_opt(r.median_no, 5),
                fmt_opt(r.median_difference, 5),
                fmt_opt(r.mean_yes, 5),
                fmt_opt(r.mean_no, 5),
                fmt_opt(r.u_statistic, 1),
                fmt_opt(r.p_value, 5),
                fmt_opt(r.effect_size, 5),
                r.significance.name()
            )?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "NA".to_string(),
    }
}

impl std::fmt::Display for ComparisonSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Populations compared: {}", self.len())?;
        writeln!(
            f,
            "Significant at p < {}: {}",
            self.alpha,
            self.significant().len()
        )?;
        writeln!(
            f,
            "Undefined (group too small): {}",
            self.results.iter().filter(|r| !r.is_defined()).count()
        )?;
        Ok(())
    }
}
