//! Row shapes produced by joining samples with their subjects.

use crate::data::population::{CellCounts, Population};
use crate::data::record::{Response, Sample, Sex, Subject};
use serde::{Deserialize, Serialize};

/// A sample together with its owning subject's attributes (Sample ⋈ Subject).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRow {
    pub sample: String,
    pub subject: String,
    pub project: String,
    pub condition: String,
    pub age: u32,
    pub sex: Sex,
    pub treatment: String,
    pub response: Response,
    pub sample_type: String,
    pub time_from_treatment_start: Option<i64>,
    pub counts: CellCounts,
}

impl CohortRow {
    /// Join one sample with its subject.
    pub fn from_parts(subject: &Subject, sample: &Sample) -> Self {
        Self {
            sample: sample.sample.clone(),
            subject: subject.subject.clone(),
            project: subject.project.clone(),
            condition: subject.condition.clone(),
            age: subject.age,
            sex: subject.sex,
            treatment: subject.treatment.clone(),
            response: subject.response,
            sample_type: sample.sample_type.clone(),
            time_from_treatment_start: sample.time_from_treatment_start,
            counts: sample.counts,
        }
    }
}

/// One population percentage of one sample, tagged with its subject's response
/// (SummaryRow ⋈ Sample ⋈ Subject).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrequency {
    pub subject: String,
    pub sample: String,
    pub population: Population,
    pub percentage: f64,
    pub response: Response,
}
