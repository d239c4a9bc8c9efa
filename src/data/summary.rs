//! Long-form per-sample relative frequency table.

use crate::data::population::{safe_percentage, Population};
use crate::data::record::Sample;
use serde::{Deserialize, Serialize};

/// One (sample, population) entry of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Row identifier, 1-based in derivation order.
    pub id: i64,
    pub sample: String,
    /// Sum of the sample's five population counts.
    pub total_count: u64,
    pub population: Population,
    pub count: u64,
    /// `100 * count / total_count`, or 0 when the total is 0.
    pub percentage: f64,
}

/// Derive the summary table from a set of samples.
///
/// Produces exactly five rows per sample, in input sample order and canonical
/// population order within each sample. The table is always rebuilt in full.
pub fn compute_summary(samples: &[Sample]) -> Vec<SummaryRow> {
    let mut rows = Vec::with_capacity(samples.len() * Population::ALL.len());

    for sample in samples {
        let total = sample.counts.total();
        for (population, count) in sample.counts.iter() {
            rows.push(SummaryRow {
                id: rows.len() as i64 + 1,
                sample: sample.sample.clone(),
                total_count: total,
                population,
                count,
                percentage: safe_percentage(count as f64, total as f64),
            });
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::population::CellCounts;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn sample(id: &str, counts: [u64; 5]) -> Sample {
        Sample {
            sample: id.to_string(),
            subject: "S1".to_string(),
            sample_type: "PBMC".to_string(),
            time_from_treatment_start: Some(0),
            counts: CellCounts::from_array(counts),
        }
    }

    #[test]
    fn test_equal_counts_give_twenty_percent() {
        let rows = compute_summary(&[sample("A1", [100; 5])]);
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert_eq!(row.count, 100);
            assert_eq!(row.total_count, 500);
            assert_relative_eq!(row.percentage, 20.0);
        }
    }

    #[test]
    fn test_five_rows_per_sample_in_order() {
        let samples = vec![sample("A1", [1, 2, 3, 4, 5]), sample("A2", [9, 0, 0, 0, 1])];
        let rows = compute_summary(&samples);
        assert_eq!(rows.len(), 10);

        let order: Vec<_> = rows.iter().map(|r| (r.sample.as_str(), r.population)).collect();
        assert_eq!(order[0], ("A1", Population::BCell));
        assert_eq!(order[4], ("A1", Population::Monocyte));
        assert_eq!(order[5], ("A2", Population::BCell));

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_percentages_sum_to_100_per_sample() {
        let samples = vec![
            sample("A1", [36000, 24663, 19000, 14000, 5000]),
            sample("A2", [3, 7, 11, 13, 17]),
            sample("A3", [1, 0, 0, 0, 0]),
        ];
        let rows = compute_summary(&samples);

        let mut sums: HashMap<&str, f64> = HashMap::new();
        for row in &rows {
            *sums.entry(row.sample.as_str()).or_default() += row.percentage;
        }
        for sum in sums.values() {
            assert_relative_eq!(*sum, 100.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_total_gives_zero_percentages() {
        let rows = compute_summary(&[sample("Z", [0; 5])]);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.percentage == 0.0 && r.total_count == 0));
    }

    #[test]
    fn test_empty_input() {
        assert!(compute_summary(&[]).is_empty());
    }
}
