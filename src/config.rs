use std::path::PathBuf;

use clap::Args;

/// Engine knobs, shared by the CLI and tests.
#[derive(Debug, Clone, Args)]
pub struct EngineConfig {
    /// Directory holding trained model artifacts
    #[arg(long, global = true, env = "GRADE_FORECAST_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Directory holding prediction history snapshots
    #[arg(long, global = true, env = "GRADE_FORECAST_HISTORY_DIR", default_value = "predictions")]
    pub history_dir: PathBuf,

    /// Seed for the train/test split and bootstrap sampling
    #[arg(long, global = true, env = "GRADE_FORECAST_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Trees per ensemble model
    #[arg(long, global = true, env = "GRADE_FORECAST_N_ESTIMATORS", default_value_t = 100)]
    pub n_estimators: usize,

    /// Share of rows held out for evaluation
    #[arg(long, global = true, env = "GRADE_FORECAST_TEST_RATIO", default_value_t = 0.2)]
    pub test_ratio: f64,

    /// Maximum grade; categories are judged on a 10-point scale
    #[arg(long, global = true, env = "GRADE_FORECAST_GRADE_SCALE", default_value_t = 100.0)]
    pub grade_scale: f64,

    /// Model kind trained when a prediction finds no saved artifact
    #[arg(long, global = true, env = "GRADE_FORECAST_ON_DEMAND_KIND", default_value = "linear_regression")]
    pub on_demand_kind: String,
}

impl EngineConfig {
    #[cfg(test)]
    pub fn with_dirs(model_dir: impl Into<PathBuf>, history_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            history_dir: history_dir.into(),
            ..Self::default()
        }
    }

    /// Converts a raw grade to the 10-point scale used for categories.
    pub fn to_ten_point(&self, grade: f64) -> f64 {
        if self.grade_scale > 0.0 {
            grade * 10.0 / self.grade_scale
        } else {
            grade
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            history_dir: PathBuf::from("predictions"),
            seed: 42,
            n_estimators: 100,
            test_ratio: 0.2,
            grade_scale: 100.0,
            on_demand_kind: "linear_regression".to_string(),
        }
    }
}
