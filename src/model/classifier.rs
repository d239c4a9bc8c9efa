//! Treatment-response classifier over per-subject population percentages.
//!
//! Training and prediction share [`percentage_features`], so a raw-count
//! request is transformed exactly as the training rows were.

use super::forest::{argmax, ForestConfig, RandomForest, SimpleRng};
use crate::data::{percentage_features, CohortRow, Population, Response, N_POPULATIONS};
use crate::error::{ImmunoError, Result};
use crate::filter::CohortCriteria;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Encoded class of non-responders.
pub const CLASS_NO: usize = 0;
/// Encoded class of responders.
pub const CLASS_YES: usize = 1;
const N_CLASSES: usize = 2;

/// Fixed label encoding: `no -> 0`, `yes -> 1`.
pub fn encode_response(response: Response) -> Option<usize> {
    match response {
        Response::No => Some(CLASS_NO),
        Response::Yes => Some(CLASS_YES),
        Response::Unknown => None,
    }
}

/// Inverse of [`encode_response`].
pub fn decode_class(class: usize) -> Response {
    if class == CLASS_YES {
        Response::Yes
    } else {
        Response::No
    }
}

/// Raw counts of one labeled subject, averaged over its samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject: String,
    pub response: Response,
    /// Number of samples averaged into `mean_counts`.
    pub n_samples: usize,
    /// Mean raw count per population, in [`Population::ALL`] order.
    pub mean_counts: [f64; N_POPULATIONS],
}

impl SubjectProfile {
    /// Percentage features of the averaged counts.
    pub fn features(&self) -> Option<[f64; N_POPULATIONS]> {
        percentage_features(&self.mean_counts)
    }
}

/// One profile per responder or non-responder subject matching `criteria`,
/// in first-seen subject order.
pub fn subject_profiles(rows: &[CohortRow], criteria: &CohortCriteria) -> Vec<SubjectProfile> {
    let mut order: Vec<&str> = Vec::new();
    let mut acc: HashMap<&str, (Response, usize, [f64; N_POPULATIONS])> = HashMap::new();

    for row in rows
        .iter()
        .filter(|r| r.response.is_labeled() && criteria.matches(r))
    {
        let entry = acc.entry(row.subject.as_str()).or_insert_with(|| {
            order.push(row.subject.as_str());
            (row.response, 0, [0.0; N_POPULATIONS])
        });
        entry.1 += 1;
        for (sum, count) in entry.2.iter_mut().zip(row.counts.as_f64()) {
            *sum += count;
        }
    }

    order
        .into_iter()
        .filter_map(|subject| {
            let (response, n, sums) = acc.get(subject)?;
            let mut mean_counts = *sums;
            mean_counts.iter_mut().for_each(|v| *v /= *n as f64);
            Some(SubjectProfile {
                subject: subject.to_string(),
                response: *response,
                n_samples: *n,
                mean_counts,
            })
        })
        .collect()
}

/// Outcome of a single-sample prediction, on a 0-100 scale rounded to two
/// decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Response,
    pub confidence: f64,
    pub probability_no: f64,
    pub probability_yes: f64,
}

/// A fitted response classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseClassifier {
    forest: RandomForest,
    config: ForestConfig,
    n_training: usize,
}

impl ResponseClassifier {
    /// Train on subject-level profiles.
    ///
    /// Profiles whose counts sum to zero have no percentage features and are
    /// skipped with a warning.
    ///
    /// # Errors
    /// - `EmptyData` if no usable profile remains
    /// - `InvalidParameter` if only one response class is present, or the
    ///   forest configuration is invalid
    pub fn train(profiles: &[SubjectProfile], config: &ForestConfig) -> Result<Self> {
        let mut features: Vec<f64> = Vec::with_capacity(profiles.len() * N_POPULATIONS);
        let mut labels: Vec<usize> = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let Some(class) = encode_response(profile.response) else {
                warn!(subject = %profile.subject, "unlabeled profile skipped");
                continue;
            };
            let Some(row) = profile.features() else {
                warn!(subject = %profile.subject, "profile with zero total count skipped");
                continue;
            };
            features.extend_from_slice(&row);
            labels.push(class);
        }

        if labels.is_empty() {
            return Err(ImmunoError::EmptyData(
                "no labeled subject profiles to train on".to_string(),
            ));
        }
        if !labels.contains(&CLASS_NO) || !labels.contains(&CLASS_YES) {
            return Err(ImmunoError::InvalidParameter(
                "training requires both responders and non-responders".to_string(),
            ));
        }

        let x = DMatrix::from_row_slice(labels.len(), N_POPULATIONS, &features);
        let forest = RandomForest::fit(&x, &labels, N_CLASSES, config)?;

        info!(
            subjects = labels.len(),
            responders = labels.iter().filter(|&&c| c == CLASS_YES).count(),
            trees = forest.n_trees(),
            "response classifier trained"
        );

        Ok(Self {
            forest,
            config: config.clone(),
            n_training: labels.len(),
        })
    }

    /// Predict response from raw counts keyed by population name.
    ///
    /// Keys that are not population names are ignored.
    ///
    /// # Errors
    /// `InvalidInput` if a population is missing, a count is negative or not
    /// finite, or the counts sum to zero.
    pub fn predict(&self, raw_counts: &HashMap<String, f64>) -> Result<Prediction> {
        let mut counts = [0.0; N_POPULATIONS];
        for population in Population::ALL {
            let value = raw_counts.get(population.as_str()).ok_or_else(|| {
                ImmunoError::InvalidInput(format!("missing count for '{}'", population))
            })?;
            counts[population.index()] = *value;
        }
        self.predict_counts(&counts)
    }

    /// Predict response from raw counts in [`Population::ALL`] order.
    pub fn predict_counts(&self, counts: &[f64; N_POPULATIONS]) -> Result<Prediction> {
        for (population, value) in Population::ALL.iter().zip(counts) {
            if !value.is_finite() || *value < 0.0 {
                return Err(ImmunoError::InvalidInput(format!(
                    "count for '{}' must be a non-negative number, got {}",
                    population, value
                )));
            }
        }
        let features = percentage_features(counts).ok_or_else(|| {
            ImmunoError::InvalidInput("total count is zero, percentages are undefined".to_string())
        })?;

        let proba = self.forest.predict_proba(&features)?;
        let class = argmax(&proba);

        Ok(Prediction {
            label: decode_class(class),
            confidence: round2(proba[class] * 100.0),
            probability_no: round2(proba[CLASS_NO] * 100.0),
            probability_yes: round2(proba[CLASS_YES] * 100.0),
        })
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Number of subjects the model was fitted on.
    pub fn n_training(&self) -> usize {
        self.n_training
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-fold and mean accuracy of k-fold cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: usize,
    /// Fraction of held-out subjects classified correctly, per fold.
    pub accuracies: Vec<f64>,
    pub mean_accuracy: f64,
}

/// Estimate accuracy with seeded, class-stratified k-fold cross-validation.
///
/// Subjects of each class are shuffled with `config.seed` and dealt round-robin
/// into folds. Each fold is scored by a classifier trained on the others.
///
/// # Errors
/// `InvalidParameter` if `folds < 2` or exceeds the number of usable
/// profiles, or if a training split ends up with a single class.
pub fn cross_validate(
    profiles: &[SubjectProfile],
    folds: usize,
    config: &ForestConfig,
) -> Result<CrossValidation> {
    let usable: Vec<&SubjectProfile> = profiles
        .iter()
        .filter(|p| p.response.is_labeled() && p.features().is_some())
        .collect();

    if folds < 2 || folds > usable.len() {
        return Err(ImmunoError::InvalidParameter(format!(
            "folds must be between 2 and {}, got {}",
            usable.len(),
            folds
        )));
    }

    let mut rng = SimpleRng::new(config.seed);
    let mut assignment = vec![0usize; usable.len()];
    let mut next_fold = 0;
    for response in [Response::No, Response::Yes] {
        let mut members: Vec<usize> = (0..usable.len())
            .filter(|&i| usable[i].response == response)
            .collect();
        rng.shuffle(&mut members);
        for i in members {
            assignment[i] = next_fold % folds;
            next_fold += 1;
        }
    }

    let mut accuracies = Vec::with_capacity(folds);
    for fold in 0..folds {
        let train: Vec<SubjectProfile> = usable
            .iter()
            .zip(&assignment)
            .filter(|&(_, &f)| f != fold)
            .map(|(p, _)| (*p).clone())
            .collect();
        let classifier = ResponseClassifier::train(&train, config)?;

        let mut correct = 0usize;
        let mut total = 0usize;
        for (profile, _) in usable.iter().zip(&assignment).filter(|&(_, &f)| f == fold) {
            let prediction = classifier.predict_counts(&profile.mean_counts)?;
            total += 1;
            if prediction.label == profile.response {
                correct += 1;
            }
        }
        accuracies.push(correct as f64 / total as f64);
    }

    let mean_accuracy = accuracies.iter().sum::<f64>() / folds as f64;
    info!(folds, mean_accuracy, "cross-validation complete");

    Ok(CrossValidation {
        folds,
        accuracies,
        mean_accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellCounts, Sex};
    use approx::assert_relative_eq;

    fn row(subject: &str, sample: &str, response: Response, counts: [u64; 5]) -> CohortRow {
        CohortRow {
            sample: sample.to_string(),
            subject: subject.to_string(),
            project: "prj1".to_string(),
            condition: "melanoma".to_string(),
            age: 55,
            sex: Sex::Female,
            treatment: "miraclib".to_string(),
            response,
            sample_type: "PBMC".to_string(),
            time_from_treatment_start: Some(0),
            counts: CellCounts::from_array(counts),
        }
    }

    /// Responders carry more CD4 T cells than non-responders.
    fn training_profiles() -> Vec<SubjectProfile> {
        let mut profiles = Vec::new();
        for i in 0..12u64 {
            let (response, cd4) = if i % 2 == 0 {
                (Response::Yes, 40_000.0 + 500.0 * i as f64)
            } else {
                (Response::No, 15_000.0 + 500.0 * i as f64)
            };
            profiles.push(SubjectProfile {
                subject: format!("S{}", i),
                response,
                n_samples: 1,
                mean_counts: [10_000.0, 20_000.0, cd4, 14_000.0, 13_000.0],
            });
        }
        profiles
    }

    fn request(counts: [f64; 5]) -> HashMap<String, f64> {
        Population::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), counts[p.index()]))
            .collect()
    }

    #[test]
    fn test_label_encoding_is_fixed() {
        assert_eq!(encode_response(Response::No), Some(0));
        assert_eq!(encode_response(Response::Yes), Some(1));
        assert_eq!(encode_response(Response::Unknown), None);
        assert_eq!(decode_class(0), Response::No);
        assert_eq!(decode_class(1), Response::Yes);
    }

    #[test]
    fn test_subject_profiles_average_counts() {
        let rows = vec![
            row("S1", "A1", Response::Yes, [10, 20, 30, 40, 50]),
            row("S2", "A2", Response::No, [1, 1, 1, 1, 1]),
            row("S1", "A3", Response::Yes, [30, 40, 50, 60, 70]),
            row("S3", "A4", Response::Unknown, [1, 1, 1, 1, 1]),
        ];
        let profiles = subject_profiles(&rows, &CohortCriteria::any());

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].subject, "S1");
        assert_eq!(profiles[0].n_samples, 2);
        assert_eq!(profiles[0].mean_counts, [20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(profiles[1].subject, "S2");
    }

    #[test]
    fn test_predict_scenario_probabilities_consistent() {
        let classifier =
            ResponseClassifier::train(&training_profiles(), &ForestConfig::default()).unwrap();
        let prediction = classifier
            .predict(&request([10_000.0, 21_000.0, 37_000.0, 14_000.0, 13_000.0]))
            .unwrap();

        assert_relative_eq!(
            prediction.probability_no + prediction.probability_yes,
            100.0,
            epsilon = 0.011
        );
        assert_relative_eq!(
            prediction.confidence,
            prediction.probability_no.max(prediction.probability_yes)
        );
        let expected = if prediction.probability_yes > prediction.probability_no {
            Response::Yes
        } else {
            Response::No
        };
        assert_eq!(prediction.label, expected);
        assert_eq!(classifier.n_training(), 12);
    }

    #[test]
    fn test_predict_follows_training_signal() {
        let classifier =
            ResponseClassifier::train(&training_profiles(), &ForestConfig::default()).unwrap();
        let high = classifier
            .predict_counts(&[10_000.0, 20_000.0, 45_000.0, 14_000.0, 13_000.0])
            .unwrap();
        let low = classifier
            .predict_counts(&[10_000.0, 20_000.0, 15_000.0, 14_000.0, 13_000.0])
            .unwrap();
        assert_eq!(high.label, Response::Yes);
        assert_eq!(low.label, Response::No);
    }

    #[test]
    fn test_prediction_uses_percentages_not_magnitudes() {
        let classifier =
            ResponseClassifier::train(&training_profiles(), &ForestConfig::default()).unwrap();
        let a = classifier
            .predict_counts(&[10_000.0, 20_000.0, 45_000.0, 14_000.0, 13_000.0])
            .unwrap();
        let b = classifier
            .predict_counts(&[1_000.0, 2_000.0, 4_500.0, 1_400.0, 1_300.0])
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let classifier =
            ResponseClassifier::train(&training_profiles(), &ForestConfig::default()).unwrap();

        let mut missing = request([1.0; 5]);
        missing.remove("nk_cell");
        assert!(matches!(
            classifier.predict(&missing),
            Err(ImmunoError::InvalidInput(msg)) if msg.contains("nk_cell")
        ));

        assert!(matches!(
            classifier.predict(&request([1.0, -1.0, 1.0, 1.0, 1.0])),
            Err(ImmunoError::InvalidInput(_))
        ));
        assert!(matches!(
            classifier.predict(&request([0.0; 5])),
            Err(ImmunoError::InvalidInput(_))
        ));
        assert!(matches!(
            classifier.predict_counts(&[f64::NAN, 1.0, 1.0, 1.0, 1.0]),
            Err(ImmunoError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_train_rejects_single_class_and_empty() {
        let yes_only: Vec<SubjectProfile> = training_profiles()
            .into_iter()
            .filter(|p| p.response == Response::Yes)
            .collect();
        assert!(matches!(
            ResponseClassifier::train(&yes_only, &ForestConfig::default()),
            Err(ImmunoError::InvalidParameter(_))
        ));
        assert!(matches!(
            ResponseClassifier::train(&[], &ForestConfig::default()),
            Err(ImmunoError::EmptyData(_))
        ));
    }

    #[test]
    fn test_train_skips_zero_total_profiles() {
        let mut profiles = training_profiles();
        profiles.push(SubjectProfile {
            subject: "empty".to_string(),
            response: Response::Yes,
            n_samples: 1,
            mean_counts: [0.0; 5],
        });
        let classifier = ResponseClassifier::train(&profiles, &ForestConfig::default()).unwrap();
        assert_eq!(classifier.n_training(), 12);
    }

    #[test]
    fn test_cross_validation_on_separable_data() {
        let cv = cross_validate(&training_profiles(), 3, &ForestConfig::default()).unwrap();
        assert_eq!(cv.folds, 3);
        assert_eq!(cv.accuracies.len(), 3);
        assert!(cv.mean_accuracy > 0.8);

        let again = cross_validate(&training_profiles(), 3, &ForestConfig::default()).unwrap();
        assert_eq!(cv, again);
    }

    #[test]
    fn test_cross_validation_fold_bounds() {
        assert!(cross_validate(&training_profiles(), 1, &ForestConfig::default()).is_err());
        assert!(cross_validate(&training_profiles(), 13, &ForestConfig::default()).is_err());
    }
}
