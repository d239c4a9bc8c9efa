//! Bagged, depth-limited decision-tree ensemble with Gini splits.
//!
//! Trees are stored as flat node arrays. A split sends a row left when its
//! feature value is `<= threshold`; thresholds sit halfway between adjacent
//! distinct training values. Leaves hold class proportions, and the forest's
//! probability is the mean of its trees' leaf proportions.

use crate::error::{ImmunoError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hyper-parameters of a [`RandomForest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees.
    pub n_trees: usize,
    /// Maximum depth; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Features examined per split; `None` uses `round(sqrt(n_features))`.
    pub max_features: Option<usize>,
    /// Smallest node that may still be split.
    pub min_samples_split: usize,
    /// Draw a bootstrap sample per tree.
    pub bootstrap: bool,
    /// Random seed.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(3),
            max_features: None,
            min_samples_split: 2,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestConfig {
    /// Reject hyper-parameters no forest can be grown with.
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(ImmunoError::InvalidParameter(
                "n_trees must be at least 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ImmunoError::InvalidParameter(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.max_features == Some(0) {
            return Err(ImmunoError::InvalidParameter(
                "max_features must be at least 1".to_string(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(ImmunoError::InvalidParameter(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    fn features_per_split(&self, n_features: usize) -> usize {
        let k = self
            .max_features
            .unwrap_or_else(|| ((n_features as f64).sqrt().round() as usize).max(1));
        k.min(n_features)
    }
}

/// Seeded xorshift64 generator.
#[derive(Debug, Clone)]
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        // splitmix64 scramble so neighbouring seeds diverge and state is never zero
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self {
            state: if z == 0 { 0x2545_F491_4F6C_DD1D } else { z },
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform index in `0..bound`.
    pub(crate) fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    /// Fisher-Yates shuffle
    pub(crate) fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        for i in (1..n).rev() {
            let j = self.below(i + 1);
            slice.swap(i, j);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        proba: Vec<f64>,
    },
}

/// A single fitted classification tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
    n_classes: usize,
}

struct Grower<'a> {
    x: &'a DMatrix<f64>,
    y: &'a [usize],
    n_classes: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    features_per_split: usize,
    rng: &'a mut SimpleRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grow a tree on the rows of `x` listed in `rows`.
    ///
    /// `rows` may repeat indices, which weights those rows accordingly.
    fn fit(
        x: &DMatrix<f64>,
        y: &[usize],
        rows: &[usize],
        n_classes: usize,
        config: &ForestConfig,
        rng: &mut SimpleRng,
    ) -> Self {
        let mut grower = Grower {
            x,
            y,
            n_classes,
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            features_per_split: config.features_per_split(x.ncols()),
            rng,
            nodes: Vec::new(),
        };
        grower.grow(rows.to_vec(), 0);
        Self {
            nodes: grower.nodes,
            n_features: x.ncols(),
            n_classes,
        }
    }

    /// Class proportions of the leaf `features` falls into.
    pub fn predict_proba(&self, features: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Longest root-to-leaf path, counted in splits.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}

impl Grower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let counts = self.class_counts(&rows);
        self.nodes.push(Node::Leaf {
            proba: proportions(&counts),
        });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.max_depth.map_or(false, |d| depth >= d);
        if pure || depth_reached || rows.len() < self.min_samples_split {
            return idx;
        }

        let Some(best) = self.best_split(&rows, gini(&counts)) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.x[(r, best.feature)] <= best.threshold);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    /// Lowest weighted Gini impurity split that improves on `parent`.
    ///
    /// Features are visited in random order; the search stops after
    /// `features_per_split` of them unless none has yielded a usable split.
    fn best_split(&mut self, rows: &[usize], parent: f64) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        self.rng.shuffle(&mut features);

        let n = rows.len() as f64;
        let mut best: Option<BestSplit> = None;

        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.features_per_split && best.is_some() {
                break;
            }

            let mut sorted: Vec<(f64, usize)> = rows
                .iter()
                .map(|&r| (self.x[(r, feature)], self.y[r]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; self.n_classes];
            let mut right = self.class_counts(rows);

            for i in 0..sorted.len() - 1 {
                let class = sorted[i].1;
                left[class] += 1;
                right[class] -= 1;

                let (value, next) = (sorted[i].0, sorted[i + 1].0);
                if value == next {
                    continue;
                }

                let n_left = (i + 1) as f64;
                let impurity =
                    (n_left * gini(&left) + (n - n_left) * gini(&right)) / n;
                if impurity < parent - 1e-12
                    && best.as_ref().map_or(true, |b| impurity < b.impurity)
                {
                    best = Some(BestSplit {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        impurity,
                    });
                }
            }
        }
        best
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &r in rows {
            counts[self.y[r]] += 1;
        }
        counts
    }
}

fn gini(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn proportions(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// An ensemble of bagged decision trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
}

impl RandomForest {
    /// Fit a forest to the feature matrix `x` (one row per observation) and
    /// class labels `y` in `0..n_classes`.
    pub fn fit(
        x: &DMatrix<f64>,
        y: &[usize],
        n_classes: usize,
        config: &ForestConfig,
    ) -> Result<Self> {
        config.validate()?;
        if x.nrows() == 0 {
            return Err(ImmunoError::EmptyData(
                "cannot fit a forest without observations".to_string(),
            ));
        }
        if x.nrows() != y.len() {
            return Err(ImmunoError::InvalidParameter(format!(
                "feature matrix has {} rows but {} labels were given",
                x.nrows(),
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(ImmunoError::InvalidParameter(format!(
                "label {} outside 0..{}",
                bad, n_classes
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ImmunoError::InvalidParameter(
                "feature matrix contains non-finite values".to_string(),
            ));
        }

        let n = x.nrows();
        let mut rng = SimpleRng::new(config.seed);
        let all_rows: Vec<usize> = (0..n).collect();

        let trees: Vec<DecisionTree> = (0..config.n_trees)
            .map(|_| {
                let rows: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.below(n)).collect()
                } else {
                    all_rows.clone()
                };
                DecisionTree::fit(x, y, &rows, n_classes, config, &mut rng)
            })
            .collect();

        debug!(
            trees = trees.len(),
            observations = n,
            mean_depth = trees.iter().map(|t| t.depth()).sum::<usize>() as f64 / trees.len() as f64,
            "forest fitted"
        );

        Ok(Self {
            trees,
            n_features: x.ncols(),
            n_classes,
        })
    }

    /// Mean leaf class proportions across trees.
    ///
    /// # Errors
    /// `features` does not have one value per training feature.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.n_features {
            return Err(ImmunoError::InvalidInput(format!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            )));
        }
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.predict_proba(features)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }

    /// Most probable class; ties go to the lower class index.
    pub fn predict(&self, features: &[f64]) -> Result<usize> {
        let proba = self.predict_proba(features)?;
        Ok(argmax(&proba))
    }

    /// Predicted class for every row of `x`.
    pub fn predict_batch(&self, x: &DMatrix<f64>) -> Result<Vec<usize>> {
        (0..x.nrows())
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                self.predict(&row)
            })
            .collect()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
