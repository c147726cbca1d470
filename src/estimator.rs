use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

pub const KIND_NAMES: [&str; 3] = ["random_forest", "gradient_boosting", "linear_regression"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ModelKind {
    LinearRegression,
    RandomForest {
        n_estimators: usize,
    },
    GradientBoosting {
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
    },
}

impl ModelKind {
    /// Unknown names fall back to linear regression.
    pub fn parse(name: &str, config: &EngineConfig) -> Self {
        match name.trim() {
            "random_forest" => ModelKind::RandomForest {
                n_estimators: config.n_estimators,
            },
            "gradient_boosting" => ModelKind::GradientBoosting {
                n_estimators: config.n_estimators,
                learning_rate: 0.1,
                max_depth: 3,
            },
            "linear_regression" | "linear" => ModelKind::LinearRegression,
            other => {
                warn!(kind = other, "unknown model kind, using linear_regression");
                ModelKind::LinearRegression
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::RandomForest { .. } => "random_forest",
            ModelKind::GradientBoosting { .. } => "gradient_boosting",
            ModelKind::LinearRegression => "linear_regression",
        }
    }

    pub fn is_tree_based(&self) -> bool {
        !matches!(self, ModelKind::LinearRegression)
    }
}

/// Standardises columns with statistics from the training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut means = Vec::with_capacity(x.ncols());
        let mut scales = Vec::with_capacity(x.ncols());
        for column in x.axis_iter(Axis(1)) {
            let mean = column.sum() / n;
            let variance = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let std = variance.sqrt();
            means.push(mean);
            scales.push(if std > 0.0 { std } else { 1.0 });
        }
        Self { means, scales }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scaled = x.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        scaled
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }
}

/// Ordinary least squares on centered features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        let (n, p) = x.dim();
        if n == 0 {
            return Err(EngineError::Training("no rows to fit".to_string()));
        }
        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
        let y_mean = y.sum() / n as f64;
        let centered = x - &x_mean;
        let y_centered = y.mapv(|v| v - y_mean);

        let mut gram = centered.t().dot(&centered);
        let rhs = centered.t().dot(&y_centered);
        // vanishing ridge keeps constant or duplicated columns solvable
        let trace = gram.diag().sum() / p.max(1) as f64;
        let ridge = 1e-8 * trace.max(1.0);
        for j in 0..p {
            gram[[j, j]] += ridge;
        }

        let coefficients = solve(gram, rhs.to_vec())?;
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(x_mean.iter())
                .map(|(c, m)| c * m)
                .sum::<f64>();
        Ok(Self {
            coefficients,
            intercept,
        })
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept
            + row
                .iter()
                .zip(&self.coefficients)
                .map(|(v, c)| v * c)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < f64::EPSILON {
            return Err(EngineError::Training("singular normal equations".to_string()));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(solution)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct TreeParams {
    max_depth: Option<usize>,
    min_samples_split: usize,
}

/// CART regression tree with squared-error splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fits on the given row indices (repeats allowed). Impurity decreases
    /// are accumulated into `importances`.
    fn fit(
        x: &Array2<f64>,
        y: &[f64],
        indices: Vec<usize>,
        params: TreeParams,
        importances: &mut [f64],
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, indices, 0, params, importances);
        tree
    }

    fn grow(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: TreeParams,
        importances: &mut [f64],
    ) -> usize {
        let value = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len().max(1) as f64;
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let depth_reached = params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached || indices.len() < params.min_samples_split {
            return node;
        }
        let Some(split) = best_split(x, y, &indices) else {
            return node;
        };

        importances[split.feature] += split.gain;
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);
        let left = self.grow(x, y, left, depth + 1, params, importances);
        let right = self.grow(x, y, right, depth + 1, params, importances);
        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn best_split(x: &Array2<f64>, y: &[f64], indices: &[usize]) -> Option<Split> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<Split> = None;
    let mut order = indices.to_vec();
    for feature in 0..x.ncols() {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for k in 1..n {
            let moved = y[order[k - 1]];
            left_sum += moved;
            left_sq += moved * moved;
            let (lo, hi) = (x[[order[k - 1], feature]], x[[order[k], feature]]);
            if lo == hi {
                continue;
            }
            let (left_n, right_n) = (k as f64, (n - k) as f64);
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);
            let gain = parent_sse - sse;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold: (lo + hi) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

fn normalize(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, n_estimators: usize, seed: u64) -> Self {
        let n = x.nrows();
        let targets = y.to_vec();
        let params = TreeParams {
            max_depth: None,
            min_samples_split: 2,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut importances = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(n_estimators.max(1));

        for _ in 0..n_estimators.max(1) {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut tree_importances = vec![0.0; x.ncols()];
            trees.push(RegressionTree::fit(x, &targets, sample, params, &mut tree_importances));
            normalize(&mut tree_importances);
            for (total, value) in importances.iter_mut().zip(tree_importances) {
                *total += value;
            }
        }
        normalize(&mut importances);
        Self { trees, importances }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}

/// Least-squares gradient boosting starting from the target mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
    ) -> Self {
        let n = x.nrows();
        let init = y.sum() / n.max(1) as f64;
        let params = TreeParams {
            max_depth: Some(max_depth),
            min_samples_split: 2,
        };
        let mut current = vec![init; n];
        let mut importances = vec![0.0; x.ncols()];
        let mut stages = Vec::with_capacity(n_estimators);

        for _ in 0..n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, c)| t - c).collect();
            let mut stage_importances = vec![0.0; x.ncols()];
            let tree = RegressionTree::fit(x, &residuals, (0..n).collect(), params, &mut stage_importances);
            for (i, value) in current.iter_mut().enumerate() {
                *value += learning_rate * tree.predict_row(x.row(i));
            }
            normalize(&mut stage_importances);
            for (total, value) in importances.iter_mut().zip(stage_importances) {
                *total += value;
            }
            stages.push(tree);
        }
        normalize(&mut importances);
        Self {
            init,
            learning_rate,
            stages,
            importances,
        }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self
                .stages
                .iter()
                .map(|tree| self.learning_rate * tree.predict_row(row))
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Estimator {
    Linear(LinearModel),
    Forest(RandomForest),
    Boosting(GradientBoosting),
}

impl Estimator {
    /// The single place where a model kind turns into a fitted estimator.
    pub fn fit(kind: &ModelKind, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(EngineError::Training(format!(
                "{} feature rows for {} targets",
                x.nrows(),
                y.len()
            )));
        }
        Ok(match *kind {
            ModelKind::LinearRegression => Estimator::Linear(LinearModel::fit(x, y)?),
            ModelKind::RandomForest { n_estimators } => {
                Estimator::Forest(RandomForest::fit(x, y, n_estimators, seed))
            }
            ModelKind::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
            } => Estimator::Boosting(GradientBoosting::fit(x, y, n_estimators, learning_rate, max_depth)),
        })
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| match self {
                Estimator::Linear(model) => model.predict_row(row),
                Estimator::Forest(model) => model.predict_row(row),
                Estimator::Boosting(model) => model.predict_row(row),
            })
            .collect()
    }

    /// Impurity-based importances for tree ensembles.
    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            Estimator::Linear(_) => None,
            Estimator::Forest(model) => Some(&model.importances),
            Estimator::Boosting(model) => Some(&model.importances),
        }
    }
}
