use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::estimator::{Estimator, ModelKind, Scaler};
use crate::models::{
    legacy_features, legacy_targets, FeatureImportance, FeatureTable, LegacyRow,
    RegressionMetrics, FEATURE_NAMES, LEGACY_FEATURE_NAMES,
};

pub const ARTIFACT_TIMESTAMP: &str = "%Y%m%d_%H%M%S_%3f";

/// Below this many rows every row is used for fitting and metrics are
/// reported in-sample.
pub const MIN_ROWS_FOR_HOLDOUT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureSet {
    /// Student-level attendance and participation.
    Legacy,
    /// Per-course features with trends.
    PerCourse,
}

/// Scaler and estimator fitted together; never mutated after training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub kind: ModelKind,
    pub feature_set: FeatureSet,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    scaler: Scaler,
    estimator: Estimator,
}

impl TrainedModel {
    pub fn id(&self) -> String {
        let prefix = match self.feature_set {
            FeatureSet::Legacy => "legacy_",
            FeatureSet::PerCourse => "",
        };
        format!(
            "{prefix}{}_{}",
            self.kind.name(),
            self.trained_at.format(ARTIFACT_TIMESTAMP)
        )
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.scaler.n_features() {
            return Err(EngineError::Training(format!(
                "model {} expects {} features, got {}",
                self.id(),
                self.scaler.n_features(),
                x.ncols()
            )));
        }
        Ok(self.estimator.predict(&self.scaler.transform(x)))
    }

    pub fn feature_importances(&self) -> Option<Vec<FeatureImportance>> {
        self.estimator.feature_importances().map(|values| {
            self.feature_names
                .iter()
                .zip(values)
                .map(|(feature, importance)| FeatureImportance {
                    feature: feature.clone(),
                    importance: *importance,
                })
                .collect()
        })
    }
}

/// A trained model keyed by its artifact identity, cheap to clone and pass
/// between training and prediction calls.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    id: String,
    model: Arc<TrainedModel>,
}

impl ModelHandle {
    pub fn new(model: TrainedModel) -> Self {
        Self {
            id: model.id(),
            model: Arc::new(model),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.model.feature_set
    }
}

#[derive(Debug, Clone)]
pub struct AdvancedFit {
    pub model: TrainedModel,
    pub metrics: RegressionMetrics,
    pub train_samples: usize,
    pub test_samples: usize,
}

fn fit_pipeline(
    kind: &ModelKind,
    feature_set: FeatureSet,
    names: &[&str],
    x: &Array2<f64>,
    y: &Array1<f64>,
    config: &EngineConfig,
    trained_at: DateTime<Utc>,
) -> Result<TrainedModel> {
    let scaler = Scaler::fit(x);
    let estimator = Estimator::fit(kind, &scaler.transform(x), y, config.seed)?;
    Ok(TrainedModel {
        kind: *kind,
        feature_set,
        feature_names: names.iter().map(|name| name.to_string()).collect(),
        trained_at,
        scaler,
        estimator,
    })
}

pub fn fit_legacy(
    rows: &[LegacyRow],
    kind: &ModelKind,
    config: &EngineConfig,
    trained_at: DateTime<Utc>,
) -> Result<TrainedModel> {
    let model = fit_pipeline(
        kind,
        FeatureSet::Legacy,
        &LEGACY_FEATURE_NAMES,
        &legacy_features(rows),
        &legacy_targets(rows),
        config,
        trained_at,
    )?;
    info!(model = %model.id(), samples = rows.len(), "trained student-level model");
    Ok(model)
}

/// Shuffled (train, test) row indices. Small tables are not split.
pub fn split_indices(n: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let all: Vec<usize> = (0..n).collect();
    if n < MIN_ROWS_FOR_HOLDOUT {
        return (all.clone(), all);
    }
    let mut shuffled = all;
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((n as f64 * test_ratio).ceil() as usize).clamp(1, n - 1);
    let test = shuffled[..n_test].to_vec();
    let train = shuffled[n_test..].to_vec();
    (train, test)
}

pub fn r2_score(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let mean = actual.mean().unwrap_or(0.0);
    let ss_tot: f64 = actual.iter().map(|a| (a - mean) * (a - mean)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum::<f64>()
        / actual.len() as f64;
    mse.sqrt()
}

pub fn fit_advanced(
    table: &FeatureTable,
    kind: &ModelKind,
    config: &EngineConfig,
    trained_at: DateTime<Utc>,
) -> Result<AdvancedFit> {
    let x = table.features();
    let y = table.targets();
    let (train, test) = split_indices(table.len(), config.test_ratio, config.seed);
    if train.len() == table.len() {
        warn!(rows = table.len(), "too few rows for a hold-out split, metrics are in-sample");
    }

    let (x_train, y_train) = (x.select(Axis(0), &train), y.select(Axis(0), &train));
    let (x_test, y_test) = (x.select(Axis(0), &test), y.select(Axis(0), &test));

    let model = fit_pipeline(
        kind,
        FeatureSet::PerCourse,
        &FEATURE_NAMES,
        &x_train,
        &y_train,
        config,
        trained_at,
    )?;
    let train_predictions = model.predict(&x_train)?;
    let test_predictions = model.predict(&x_test)?;
    let metrics = RegressionMetrics {
        train_r2: r2_score(&y_train, &train_predictions),
        test_r2: r2_score(&y_test, &test_predictions),
        rmse: rmse(&y_test, &test_predictions),
    };
    info!(
        model = %model.id(),
        train_r2 = metrics.train_r2,
        test_r2 = metrics.test_r2,
        rmse = metrics.rmse,
        "trained per-course model"
    );

    Ok(AdvancedFit {
        model,
        metrics,
        train_samples: train.len(),
        test_samples: test.len(),
    })
}
