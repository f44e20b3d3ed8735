//! # Random Forest Regressor
//!
//! Bagged CART regression trees on the variance (squared-error) criterion.
//!
//! - Each tree draws a bootstrap sample seeded with `random_state + tree_index`,
//!   so the fitted forest is identical no matter how many threads grow it.
//! - At every split a fresh random subset of features is considered
//!   ([`MaxFeatures`]), which decorrelates the trees.
//! - Trees are stored as flat parallel arrays (`children_left`, `children_right`,
//!   `feature`, `threshold`, `value`) so they serialize compactly and predict
//!   without pointer chasing. A node is a leaf when `children_left == -1`.

use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LEAF: i64 = -1;

/// Minimum node impurity (variance) below which a node is not split further.
const MIN_IMPURITY: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForestError {
    #[error("Cannot fit a forest on zero samples.")]
    EmptyInput,
    #[error("Feature matrix has {x_rows} rows but the target has {y_len} values.")]
    LengthMismatch { x_rows: usize, y_len: usize },
    #[error("Target contains non-finite values.")]
    NonFiniteTarget,
    #[error("Invalid forest parameters: {0}")]
    InvalidParams(String),
    #[error("Model expects {expected} features, got {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Tree {tree} is malformed: {reason}")]
    CorruptTree { tree: usize, reason: String },
}

/// Size of the feature subset drawn at each split.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    Sqrt,
    Log2,
    All,
    /// Fraction of the feature count, rounded down.
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Fraction(f) => (f * n_features as f64) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// `None` grows trees until the leaf constraints stop them. Written as `0` in TOML.
    #[serde(with = "depth_limit")]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: Some(8),
            min_samples_split: 6,
            min_samples_leaf: 3,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidParams("n_estimators must be >= 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams("min_samples_split must be >= 2".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams("min_samples_leaf must be >= 1".into()));
        }
        if let MaxFeatures::Fraction(f) = self.max_features {
            if !(f > 0.0 && f <= 1.0) {
                return Err(ForestError::InvalidParams(format!(
                    "max_features fraction must be in (0, 1], got {f}"
                )));
            }
        }
        if self.max_depth == Some(0) {
            return Err(ForestError::InvalidParams("max_depth must be >= 1".into()));
        }
        Ok(())
    }
}

/// TOML has no null, so an unlimited depth is stored as zero.
mod depth_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(depth: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(depth.unwrap_or(0) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        let depth = usize::deserialize(d)?;
        Ok((depth > 0).then_some(depth))
    }
}

/// One fitted regression tree in array form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<usize>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl RegressionTree {
    pub fn n_nodes(&self) -> usize {
        self.value.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(tree: &RegressionTree, node: usize) -> usize {
            match tree.children_left[node] {
                LEAF => 0,
                left => {
                    let right = tree.children_right[node] as usize;
                    1 + walk(tree, left as usize).max(walk(tree, right))
                }
            }
        }
        if self.value.is_empty() { 0 } else { walk(self, 0) }
    }

    /// Checks the structural invariants `predict_row` relies on: parallel arrays
    /// of one non-zero length, children strictly after their parent and in
    /// bounds (so every walk terminates), split features below `n_features`.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        let n = self.value.len();
        if n == 0 {
            return Err("tree has no nodes".into());
        }
        let lengths = [
            self.children_left.len(),
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(format!("node arrays have lengths {lengths:?}, values have {n}"));
        }
        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF && right == LEAF {
                if !self.value[node].is_finite() {
                    return Err(format!("leaf {node} holds a non-finite value"));
                }
                continue;
            }
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(format!("node {node} points to invalid child {child}"));
                }
            }
            if self.feature[node] >= n_features {
                return Err(format!(
                    "node {node} splits on feature {} of {n_features}",
                    self.feature[node]
                ));
            }
            if self.threshold[node].is_nan() {
                return Err(format!("node {node} has a NaN threshold"));
            }
        }
        Ok(())
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            node = if row[self.feature[node]] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

/// A fitted forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    pub n_features: usize,
    pub trees: Vec<RegressionTree>,
    /// Impurity-decrease importances, normalized to sum to one.
    pub feature_importances: Vec<f64>,
    /// Out-of-bag R², when bootstrapping left every sample out at least once.
    pub oob_score: Option<f64>,
}

impl RandomForest {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &ForestParams,
    ) -> Result<Self, ForestError> {
        params.validate()?;
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            return Err(ForestError::EmptyInput);
        }
        if n_samples != y.len() {
            return Err(ForestError::LengthMismatch {
                x_rows: n_samples,
                y_len: y.len(),
            });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ForestError::NonFiniteTarget);
        }

        let grown: Vec<GrownTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| grow_tree(x, y, params, params.random_state.wrapping_add(t as u64)))
            .collect();

        let mut feature_importances = vec![0.0; n_features];
        let mut oob_sum = vec![0.0; n_samples];
        let mut oob_count = vec![0usize; n_samples];
        let mut trees = Vec::with_capacity(grown.len());
        for g in grown {
            let total: f64 = g.importances.iter().sum();
            if total > 0.0 {
                for (acc, imp) in feature_importances.iter_mut().zip(&g.importances) {
                    *acc += imp / total;
                }
            }
            for &i in &g.out_of_bag {
                oob_sum[i] += g.tree.predict_row(x.row(i));
                oob_count[i] += 1;
            }
            trees.push(g.tree);
        }
        let total: f64 = feature_importances.iter().sum();
        if total > 0.0 {
            feature_importances.iter_mut().for_each(|v| *v /= total);
        }

        let oob_score = if params.bootstrap && oob_count.iter().all(|&c| c > 0) {
            let preds: Vec<f64> = oob_sum
                .iter()
                .zip(&oob_count)
                .map(|(s, &c)| s / c as f64)
                .collect();
            let truth: Vec<f64> = y.to_vec();
            Some(crate::metrics::r2_score(&truth, &preds))
        } else {
            None
        };

        Ok(Self {
            params: params.clone(),
            n_features,
            trees,
            feature_importances,
            oob_score,
        })
    }

    /// Verifies a deserialized forest before it is used for prediction.
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.trees.is_empty() {
            return Err(ForestError::InvalidParams("forest has no trees".into()));
        }
        if self.feature_importances.len() != self.n_features {
            return Err(ForestError::FeatureCountMismatch {
                expected: self.n_features,
                found: self.feature_importances.len(),
            });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|reason| ForestError::CorruptTree { tree: i, reason })?;
        }
        Ok(())
    }

    /// Mean prediction across trees for every row of `x`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<f64>, ForestError> {
        if x.ncols() != self.n_features {
            return Err(ForestError::FeatureCountMismatch {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        let n_trees = self.trees.len() as f64;
        Ok(x.axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }
}

struct GrownTree {
    tree: RegressionTree,
    importances: Vec<f64>,
    out_of_bag: Vec<usize>,
}

fn grow_tree(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    params: &ForestParams,
    seed: u64,
) -> GrownTree {
    let n_samples = x.nrows();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples: Vec<usize> = if params.bootstrap {
        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
    } else {
        (0..n_samples).collect()
    };

    let out_of_bag = if params.bootstrap {
        let mut in_bag = vec![false; n_samples];
        samples.iter().for_each(|&i| in_bag[i] = true);
        (0..n_samples).filter(|&i| !in_bag[i]).collect()
    } else {
        Vec::new()
    };

    let mut builder = TreeBuilder {
        x: x.view(),
        y: y.view(),
        params,
        max_features: params.max_features.resolve(x.ncols()),
        rng,
        tree: RegressionTree {
            children_left: Vec::new(),
            children_right: Vec::new(),
            feature: Vec::new(),
            threshold: Vec::new(),
            value: Vec::new(),
        },
        importances: vec![0.0; x.ncols()],
    };
    builder.build(&mut samples, 0);

    GrownTree {
        tree: builder.tree,
        importances: builder.importances,
        out_of_bag,
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    /// Sum of squared errors of the two children combined.
    children_sse: f64,
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'a ForestParams,
    max_features: usize,
    rng: StdRng,
    tree: RegressionTree,
    importances: Vec<f64>,
}

impl TreeBuilder<'_> {
    fn push_node(&mut self, value: f64) -> usize {
        self.tree.children_left.push(LEAF);
        self.tree.children_right.push(LEAF);
        self.tree.feature.push(0);
        self.tree.threshold.push(0.0);
        self.tree.value.push(value);
        self.tree.value.len() - 1
    }

    /// Grows the subtree for `samples` and returns its node id.
    fn build(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let n = samples.len();
        let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let v = self.y[i];
            (s + v, sq + v * v)
        });
        let mean = sum / n as f64;
        let node_sse = (sum_sq - sum * sum / n as f64).max(0.0);
        let node = self.push_node(mean);

        let depth_exhausted = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_exhausted
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || node_sse / n as f64 <= MIN_IMPURITY
        {
            return node;
        }

        let Some(split) = self.best_split(samples, sum, sum_sq) else {
            return node;
        };

        let (x, feature, threshold) = (self.x, split.feature, split.threshold);
        let boundary = partition(samples, |i| x[[i, feature]] <= threshold);
        self.importances[feature] += node_sse - split.children_sse;

        let (left_samples, right_samples) = samples.split_at_mut(boundary);
        let left = self.build(left_samples, depth + 1);
        let right = self.build(right_samples, depth + 1);

        self.tree.children_left[node] = left as i64;
        self.tree.children_right[node] = right as i64;
        self.tree.feature[node] = feature;
        self.tree.threshold[node] = threshold;
        node
    }

    fn best_split(&mut self, samples: &[usize], sum: f64, sum_sq: f64) -> Option<Split> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        let candidates = index::sample(&mut self.rng, self.x.ncols(), self.max_features);

        let mut best: Option<Split> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);
        for feature in candidates.iter() {
            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
            if pairs[0].0 == pairs[n - 1].0 {
                continue;
            }

            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 1..n {
                let (value, target) = pairs[k - 1];
                left_sum += target;
                left_sq += target * target;
                let next = pairs[k].0;
                if value == next || k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / k as f64;
                let right_sse = right_sq - right_sum * right_sum / (n - k) as f64;
                let children_sse = (left_sse + right_sse).max(0.0);
                if best.as_ref().is_none_or(|b| children_sse < b.children_sse) {
                    let mut threshold = 0.5 * (value + next);
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        children_sse,
                    });
                }
            }
        }
        best
    }
}

/// Moves every element satisfying `pred` to the front; returns how many did.
fn partition(items: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for i in 0..items.len() {
        if pred(items[i]) {
            items.swap(i, boundary);
            boundary += 1;
        }
    }
    boundary
}
