//! Cohort selection and cross-tabulation over joined sample/subject rows.
//!
//! All predicates are conjunctive exact matches; an unset predicate matches
//! everything. Nothing is cached, every call works from the rows it is given.

use crate::data::{CohortRow, Population, Response, ResponseFrequency, Sex, SummaryRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Inclusion predicates for a cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortCriteria {
    pub sample_type: Option<String>,
    pub time_from_treatment_start: Option<i64>,
    pub condition: Option<String>,
    pub treatment: Option<String>,
    pub sex: Option<Sex>,
    pub response: Option<Response>,
}

impl CohortCriteria {
    /// Criteria on sample type, timepoint, condition and treatment.
    pub fn new(sample_type: &str, timepoint: i64, condition: &str, treatment: &str) -> Self {
        Self {
            sample_type: Some(sample_type.to_string()),
            time_from_treatment_start: Some(timepoint),
            condition: Some(condition.to_string()),
            treatment: Some(treatment.to_string()),
            ..Default::default()
        }
    }

    /// Criteria that match every row.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn sample_type(mut self, sample_type: &str) -> Self {
        self.sample_type = Some(sample_type.to_string());
        self
    }

    pub fn timepoint(mut self, timepoint: i64) -> Self {
        self.time_from_treatment_start = Some(timepoint);
        self
    }

    pub fn condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn treatment(mut self, treatment: &str) -> Self {
        self.treatment = Some(treatment.to_string());
        self
    }

    pub fn sex(mut self, sex: Sex) -> Self {
        self.sex = Some(sex);
        self
    }

    pub fn response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Whether a row satisfies every set predicate.
    ///
    /// A row without a timepoint never matches a timepoint predicate.
    pub fn matches(&self, row: &CohortRow) -> bool {
        fn eq<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
            wanted.as_ref().map_or(true, |w| w == actual)
        }

        eq(&self.sample_type, &row.sample_type)
            && eq(&self.condition, &row.condition)
            && eq(&self.treatment, &row.treatment)
            && eq(&self.sex, &row.sex)
            && eq(&self.response, &row.response)
            && self
                .time_from_treatment_start
                .map_or(true, |t| row.time_from_treatment_start == Some(t))
    }
}

/// Column used to cross-tabulate a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateColumn {
    /// Number of samples per project.
    Project,
    /// Number of distinct subjects per response label.
    Response,
    /// Number of distinct subjects per sex.
    Sex,
}

/// Cross-tabulations of one filtered cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub criteria: CohortCriteria,
    /// Sample identifiers in the cohort, in row order.
    pub samples: Vec<String>,
    pub n_subjects: usize,
    pub by_project: BTreeMap<String, usize>,
    pub by_response: BTreeMap<String, usize>,
    pub by_sex: BTreeMap<String, usize>,
}

/// Rows satisfying all predicates of `criteria`, in input order.
pub fn filter_cohort(rows: &[CohortRow], criteria: &CohortCriteria) -> Vec<CohortRow> {
    rows.iter().filter(|r| criteria.matches(r)).cloned().collect()
}

/// Count rows by the distinct values of `column`.
///
/// Projects count samples. Response and sex count distinct subjects, so a
/// subject contributing several samples is counted once.
pub fn aggregate_by(rows: &[CohortRow], column: AggregateColumn) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();

    match column {
        AggregateColumn::Project => {
            for row in rows {
                *counts.entry(row.project.clone()).or_insert(0) += 1;
            }
        }
        AggregateColumn::Response | AggregateColumn::Sex => {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for row in rows {
                if !seen.insert(row.subject.as_str()) {
                    continue;
                }
                let key = match column {
                    AggregateColumn::Response => row.response.as_str(),
                    _ => row.sex.as_str(),
                };
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
        }
    }

    counts
}

/// Filter rows and compute all three cross-tabulations.
pub fn summarize_cohort(rows: &[CohortRow], criteria: &CohortCriteria) -> CohortSummary {
    let cohort = filter_cohort(rows, criteria);
    let n_subjects = cohort
        .iter()
        .map(|r| r.subject.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    CohortSummary {
        criteria: criteria.clone(),
        samples: cohort.iter().map(|r| r.sample.clone()).collect(),
        n_subjects,
        by_project: aggregate_by(&cohort, AggregateColumn::Project),
        by_response: aggregate_by(&cohort, AggregateColumn::Response),
        by_sex: aggregate_by(&cohort, AggregateColumn::Sex),
    }
}

/// Mean raw count of `population` over the samples matching `criteria`.
///
/// Returns `None` when no sample matches.
pub fn mean_count(rows: &[CohortRow], criteria: &CohortCriteria, population: Population) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .filter(|r| criteria.matches(r))
        .map(|r| r.counts.get(population) as f64)
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Join summary rows with the cohort, keeping only responders and non-responders.
///
/// Output follows summary row order.
pub fn response_frequencies(
    summary: &[SummaryRow],
    rows: &[CohortRow],
    criteria: &CohortCriteria,
) -> Vec<ResponseFrequency> {
    let by_sample: HashMap<&str, &CohortRow> = rows
        .iter()
        .filter(|r| r.response.is_labeled() && criteria.matches(r))
        .map(|r| (r.sample.as_str(), r))
        .collect();

    summary
        .iter()
        .filter_map(|s| {
            by_sample.get(s.sample.as_str()).map(|row| ResponseFrequency {
                subject: row.subject.clone(),
                sample: s.sample.clone(),
                population: s.population,
                percentage: s.percentage,
                response: row.response,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{compute_summary, CellCounts, Sample};
    use approx::assert_relative_eq;

    fn row(
        sample: &str,
        subject: &str,
        project: &str,
        sex: Sex,
        response: Response,
        sample_type: &str,
        time: Option<i64>,
    ) -> CohortRow {
        CohortRow {
            sample: sample.to_string(),
            subject: subject.to_string(),
            project: project.to_string(),
            condition: "melanoma".to_string(),
            age: 50,
            sex,
            treatment: "miraclib".to_string(),
            response,
            sample_type: sample_type.to_string(),
            time_from_treatment_start: time,
            counts: CellCounts::from_array([10, 20, 30, 40, 50]),
        }
    }

    fn fixture() -> Vec<CohortRow> {
        vec![
            row("s1", "p1", "prj1", Sex::Male, Response::Yes, "PBMC", Some(0)),
            row("s2", "p1", "prj1", Sex::Male, Response::Yes, "PBMC", Some(7)),
            row("s3", "p1", "prj2", Sex::Male, Response::Yes, "PBMC", Some(0)),
            row("s4", "p2", "prj2", Sex::Female, Response::No, "PBMC", Some(0)),
            row("s5", "p3", "prj1", Sex::Female, Response::Unknown, "WB", Some(0)),
            row("s6", "p4", "prj3", Sex::Male, Response::No, "PBMC", None),
        ]
    }

    #[test]
    fn test_filter_returns_only_matching_row() {
        let mut other = row("B1", "S2", "prj1", Sex::Female, Response::No, "PBMC", Some(0));
        other.condition = "carcinoma".to_string();
        let rows = vec![
            row("A1", "S1", "prj1", Sex::Male, Response::Yes, "PBMC", Some(0)),
            other,
        ];
        let criteria = CohortCriteria::new("PBMC", 0, "melanoma", "miraclib");
        let filtered = filter_cohort(&rows, &criteria);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].sample, "A1");
    }

    #[test]
    fn test_missing_timepoint_never_matches() {
        let criteria = CohortCriteria::any().timepoint(0);
        let filtered = filter_cohort(&fixture(), &criteria);
        assert!(filtered.iter().all(|r| r.sample != "s6"));
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_project_counts_samples() {
        let criteria = CohortCriteria::new("PBMC", 0, "melanoma", "miraclib");
        let cohort = filter_cohort(&fixture(), &criteria);
        let by_project = aggregate_by(&cohort, AggregateColumn::Project);
        assert_eq!(by_project.get("prj1"), Some(&1));
        assert_eq!(by_project.get("prj2"), Some(&2));
    }

    #[test]
    fn test_response_and_sex_count_distinct_subjects() {
        let rows = fixture();
        let by_response = aggregate_by(&rows, AggregateColumn::Response);
        let by_sex = aggregate_by(&rows, AggregateColumn::Sex);

        let distinct_subjects = 4;
        assert_eq!(by_response.values().sum::<usize>(), distinct_subjects);
        assert_eq!(by_sex.values().sum::<usize>(), distinct_subjects);
        assert_eq!(by_response.get("yes"), Some(&1));
        assert_eq!(by_response.get("unknown"), Some(&1));
        assert_eq!(by_sex.get("M"), Some(&2));
    }

    #[test]
    fn test_summarize_cohort() {
        let criteria = CohortCriteria::new("PBMC", 0, "melanoma", "miraclib");
        let summary = summarize_cohort(&fixture(), &criteria);
        assert_eq!(summary.samples, vec!["s1", "s3", "s4"]);
        assert_eq!(summary.n_subjects, 2);
        assert_eq!(summary.by_response.values().sum::<usize>(), summary.n_subjects);
        assert_eq!(summary.by_sex.values().sum::<usize>(), summary.n_subjects);
        assert_eq!(summary.by_project.values().sum::<usize>(), summary.samples.len());
    }

    #[test]
    fn test_mean_count_for_male_responders_at_baseline() {
        let mut rows = fixture();
        rows[2].counts = CellCounts::from_array([30, 0, 0, 0, 0]);
        let criteria = CohortCriteria::any()
            .condition("melanoma")
            .timepoint(0)
            .sex(Sex::Male)
            .response(Response::Yes);
        let mean = mean_count(&rows, &criteria, Population::BCell).unwrap();
        assert_relative_eq!(mean, 20.0);

        let nobody = CohortCriteria::any().condition("glioma");
        assert!(mean_count(&rows, &nobody, Population::BCell).is_none());
    }

    #[test]
    fn test_response_frequencies_exclude_unlabeled() {
        let rows = fixture();
        let samples: Vec<Sample> = rows
            .iter()
            .map(|r| Sample {
                sample: r.sample.clone(),
                subject: r.subject.clone(),
                sample_type: r.sample_type.clone(),
                time_from_treatment_start: r.time_from_treatment_start,
                counts: r.counts,
            })
            .collect();
        let summary = compute_summary(&samples);

        let freqs = response_frequencies(&summary, &rows, &CohortCriteria::any());
        assert_eq!(freqs.len(), 5 * 5);
        assert!(freqs.iter().all(|f| f.response.is_labeled()));

        let pbmc = response_frequencies(&summary, &rows, &CohortCriteria::any().sample_type("PBMC"));
        assert_eq!(pbmc.len(), 5 * 5);
        assert_eq!(pbmc[0].subject, "p1");
        assert_eq!(pbmc[0].population, Population::BCell);
    }

    #[test]
    fn test_criteria_yaml_defaults() {
        let criteria: CohortCriteria = serde_yaml::from_str("sample_type: PBMC\n").unwrap();
        assert_eq!(criteria, CohortCriteria::any().sample_type("PBMC"));
    }
}
