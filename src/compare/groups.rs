//! Per-population comparison of responders against non-responders.

use super::result::{AggregationPolicy, ComparisonResult, ComparisonSet, Significance};
use crate::data::{Population, Response, ResponseFrequency};
use crate::error::Result;
use crate::test::mann_whitney_u;
use std::collections::HashMap;
use tracing::{debug, info};

/// Significance threshold on raw p-values.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Minimum observations per group for the test to run.
pub const MIN_GROUP_SIZE: usize = 2;

/// Compare the percentage of every population between responders and
/// non-responders.
///
/// Rows with an unknown response are ignored. Results follow the order in
/// which populations first appear in `rows`. A population where either group
/// has fewer than [`MIN_GROUP_SIZE`] observations gets an undefined result
/// rather than an error.
///
/// # Example
///
/// ```
/// use immunoprofile::prelude::*;
///
/// let rows: Vec<ResponseFrequency> = Vec::new();
/// let set = compare_groups(&rows, AggregationPolicy::PerSubject).unwrap();
/// assert!(set.is_empty());
/// ```
pub fn compare_groups(
    rows: &[ResponseFrequency],
    policy: AggregationPolicy,
) -> Result<ComparisonSet> {
    compare_groups_with_alpha(rows, policy, DEFAULT_ALPHA)
}

/// [`compare_groups`] with an explicit significance threshold.
pub fn compare_groups_with_alpha(
    rows: &[ResponseFrequency],
    policy: AggregationPolicy,
    alpha: f64,
) -> Result<ComparisonSet> {
    let mut order: Vec<Population> = Vec::new();
    for row in rows {
        if row.response.is_labeled() && !order.contains(&row.population) {
            order.push(row.population);
        }
    }

    let mut results = Vec::with_capacity(order.len());
    for population in order {
        let (yes, no) = group_values(rows, population, policy);
        let result = compare_population(population, &yes, &no, alpha)?;
        debug!(
            population = %population,
            n_yes = result.n_yes,
            n_no = result.n_no,
            p_value = ?result.p_value,
            "population compared"
        );
        results.push(result);
    }

    let set = ComparisonSet {
        policy,
        alpha,
        results,
    };
    info!(
        populations = set.len(),
        significant = set.significant().len(),
        policy = ?policy,
        "group comparison complete"
    );
    Ok(set)
}

/// Responder and non-responder values for one population.
///
/// Per-subject values are means over each subject's samples and keep the
/// order in which subjects first appear.
fn group_values(
    rows: &[ResponseFrequency],
    population: Population,
    policy: AggregationPolicy,
) -> (Vec<f64>, Vec<f64>) {
    let selected = rows
        .iter()
        .filter(|r| r.population == population && r.response.is_labeled());

    let pairs: Vec<(Response, f64)> = match policy {
        AggregationPolicy::PerSample => selected.map(|r| (r.response, r.percentage)).collect(),
        AggregationPolicy::PerSubject => {
            let mut keys: Vec<(&str, Response)> = Vec::new();
            let mut sums: HashMap<(&str, Response), (f64, usize)> = HashMap::new();
            for r in selected {
                let key = (r.subject.as_str(), r.response);
                let entry = sums.entry(key).or_insert_with(|| {
                    keys.push(key);
                    (0.0, 0)
                });
                entry.0 += r.percentage;
                entry.1 += 1;
            }
            keys.into_iter()
                .map(|key| {
                    let (sum, n) = sums[&key];
                    (key.1, sum / n as f64)
                })
                .collect()
        }
    };

    let yes = pairs
        .iter()
        .filter(|(response, _)| *response == Response::Yes)
        .map(|(_, v)| *v)
        .collect();
    let no = pairs
        .iter()
        .filter(|(response, _)| *response == Response::No)
        .map(|(_, v)| *v)
        .collect();
    (yes, no)
}

fn compare_population(
    population: Population,
    yes: &[f64],
    no: &[f64],
    alpha: f64,
) -> Result<ComparisonResult> {
    let median_yes = median(yes);
    let median_no = median(no);
    let median_difference = match (median_yes, median_no) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    };

    let mut result = ComparisonResult {
        population,
        n_yes: yes.len(),
        n_no: no.len(),
        median_yes,
        median_no,
        mean_yes: mean(yes),
        mean_no: mean(no),
        median_difference,
        u_statistic: None,
        p_value: None,
        effect_size: None,
        significance: Significance::Undefined,
    };

    if yes.len() < MIN_GROUP_SIZE || no.len() < MIN_GROUP_SIZE {
        return Ok(result);
    }

    let test = mann_whitney_u(yes, no)?;
    result.u_statistic = Some(test.u_statistic);
    result.p_value = Some(test.p_value);
    result.effect_size = Some(test.rank_biserial());
    result.significance = if test.p_value < alpha {
        Significance::Significant
    } else {
        Significance::NotSignificant
    };
    Ok(result)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
