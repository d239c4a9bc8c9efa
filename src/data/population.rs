//! Cell populations and the shared percentage transform.
//!
//! Every relative-frequency value in the crate (summary table, classifier
//! training features, prediction features) is produced by [`safe_percentage`],
//! so the zero-total policy and the formula live in exactly one place.

use crate::error::{ImmunoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of measured cell populations per sample.
pub const N_POPULATIONS: usize = 5;

/// An immune cell population measured in every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    BCell,
    Cd8TCell,
    Cd4TCell,
    NkCell,
    Monocyte,
}

impl Population {
    /// All populations in canonical column order.
    pub const ALL: [Population; N_POPULATIONS] = [
        Population::BCell,
        Population::Cd8TCell,
        Population::Cd4TCell,
        Population::NkCell,
        Population::Monocyte,
    ];

    /// Column / label name as it appears in input files and the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BCell => "b_cell",
            Self::Cd8TCell => "cd8_t_cell",
            Self::Cd4TCell => "cd4_t_cell",
            Self::NkCell => "nk_cell",
            Self::Monocyte => "monocyte",
        }
    }

    /// Position in [`Population::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Self::BCell => 0,
            Self::Cd8TCell => 1,
            Self::Cd4TCell => 2,
            Self::NkCell => 3,
            Self::Monocyte => 4,
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Population {
    type Err = ImmunoError;

    fn from_str(s: &str) -> Result<Self> {
        Population::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ImmunoError::InvalidParameter(format!("Unknown cell population '{}'", s)))
    }
}

/// Relative frequency of `count` within `total`, in percent.
///
/// Returns 0 when `total` is not positive.
pub fn safe_percentage(count: f64, total: f64) -> f64 {
    if total > 0.0 {
        count / total * 100.0
    } else {
        0.0
    }
}

/// Percentage feature vector for one row of five population counts.
///
/// This is the transform used both when training the response classifier and
/// when predicting, so the denominator is always the sum of the five counts.
/// Returns `None` when the total is zero, since no percentage is defined.
pub fn percentage_features(counts: &[f64; N_POPULATIONS]) -> Option<[f64; N_POPULATIONS]> {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut features = [0.0; N_POPULATIONS];
    for (out, &count) in features.iter_mut().zip(counts.iter()) {
        *out = safe_percentage(count, total);
    }
    Some(features)
}

/// Raw integer counts for the five populations of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellCounts {
    pub b_cell: u64,
    pub cd8_t_cell: u64,
    pub cd4_t_cell: u64,
    pub nk_cell: u64,
    pub monocyte: u64,
}

impl CellCounts {
    /// Build from values in [`Population::ALL`] order.
    pub fn from_array(values: [u64; N_POPULATIONS]) -> Self {
        Self {
            b_cell: values[0],
            cd8_t_cell: values[1],
            cd4_t_cell: values[2],
            nk_cell: values[3],
            monocyte: values[4],
        }
    }

    /// Values in [`Population::ALL`] order.
    pub fn to_array(&self) -> [u64; N_POPULATIONS] {
        [
            self.b_cell,
            self.cd8_t_cell,
            self.cd4_t_cell,
            self.nk_cell,
            self.monocyte,
        ]
    }

    /// Count for one population.
    pub fn get(&self, population: Population) -> u64 {
        self.to_array()[population.index()]
    }

    /// Sum of all five counts.
    pub fn total(&self) -> u64 {
        self.to_array().iter().sum()
    }

    /// Iterate `(population, count)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Population, u64)> {
        Population::ALL.into_iter().zip(self.to_array())
    }

    /// Counts as floating point, for averaging and feature engineering.
    pub fn as_f64(&self) -> [f64; N_POPULATIONS] {
        self.to_array().map(|v| v as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_population_round_trip_names() {
        for p in Population::ALL {
            assert_eq!(p.as_str().parse::<Population>().unwrap(), p);
            assert_eq!(Population::ALL[p.index()], p);
        }
        assert!("t_cell".parse::<Population>().is_err());
    }

    #[test]
    fn test_population_serde_names_match_columns() {
        let json = serde_json::to_string(&Population::Cd8TCell).unwrap();
        assert_eq!(json, "\"cd8_t_cell\"");
    }

    #[test]
    fn test_safe_percentage_zero_total() {
        assert_eq!(safe_percentage(0.0, 0.0), 0.0);
        assert_eq!(safe_percentage(5.0, 0.0), 0.0);
        assert_relative_eq!(safe_percentage(25.0, 200.0), 12.5);
    }

    #[test]
    fn test_percentage_features_sum_to_100() {
        let features = percentage_features(&[10000.0, 21000.0, 37000.0, 14000.0, 13000.0]).unwrap();
        let sum: f64 = features.iter().sum();
        assert_relative_eq!(sum, 100.0, epsilon = 1e-9);
        assert_relative_eq!(features[0], 10000.0 / 95000.0 * 100.0);
    }

    #[test]
    fn test_percentage_features_undefined_for_zero_total() {
        assert!(percentage_features(&[0.0; N_POPULATIONS]).is_none());
    }

    #[test]
    fn test_cell_counts_accessors() {
        let counts = CellCounts::from_array([1, 2, 3, 4, 5]);
        assert_eq!(counts.total(), 15);
        assert_eq!(counts.get(Population::NkCell), 4);
        let pairs: Vec<_> = counts.iter().collect();
        assert_eq!(pairs[0], (Population::BCell, 1));
        assert_eq!(pairs[4], (Population::Monocyte, 5));
    }
}
