use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::estimator::KIND_NAMES;
use crate::models::PredictionRecord;
use crate::trainer::{FeatureSet, TrainedModel};

const ARTIFACT_EXTENSION: &str = "bin";
const HISTORY_PREFIX: &str = "prediction_student_";
const HISTORY_TIMESTAMP: &str = "%Y%m%d%H%M%S%3f";

/// Directory of `{kind}_{timestamp}.bin` model artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, model: &TrainedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.{ARTIFACT_EXTENSION}", model.id()));
        let bytes = bincode::serialize(model).map_err(|err| EngineError::Artifact {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        fs::write(&path, bytes)?;
        info!(path = %path.display(), "saved model artifact");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<TrainedModel> {
        let bytes = fs::read(path)?;
        let model: TrainedModel = bincode::deserialize(&bytes).map_err(|err| EngineError::Artifact {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if model.feature_set != FeatureSet::PerCourse {
            return Err(EngineError::Artifact {
                path: path.to_path_buf(),
                reason: "artifact does not hold a per-course model".to_string(),
            });
        }
        Ok(model)
    }

    /// Artifact paths, newest first by the timestamp in their name.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut artifacts: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            if let Some(stamp) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(artifact_timestamp)
            {
                artifacts.push((stamp.to_string(), path));
            }
        }
        artifacts.sort_by(|a, b| b.cmp(a));
        Ok(artifacts.into_iter().map(|(_, path)| path).collect())
    }

    /// The newest artifact, or `None` when nothing has been trained yet.
    pub fn load_latest(&self) -> Result<Option<TrainedModel>> {
        match self.list()?.first() {
            Some(path) => self.load(path).map(Some),
            None => Ok(None),
        }
    }
}

fn artifact_timestamp(stem: &str) -> Option<&str> {
    KIND_NAMES.iter().find_map(|kind| {
        let stamp = stem.strip_prefix(kind)?.strip_prefix('_')?;
        let well_formed = stamp.len() == 19
            && stamp
                .chars()
                .enumerate()
                .all(|(i, c)| if i == 8 || i == 15 { c == '_' } else { c.is_ascii_digit() });
        well_formed.then_some(stamp)
    })
}

/// One prediction call persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub predictions: Vec<PredictionRecord>,
}

/// Append-only directory of prediction snapshots.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn append(
        &self,
        student_id: i64,
        predictions: &[PredictionRecord],
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "{HISTORY_PREFIX}{student_id}_{}.json",
            at.format(HISTORY_TIMESTAMP)
        ));
        fs::write(&path, serde_json::to_vec_pretty(predictions)?)?;
        Ok(path)
    }

    /// The `limit` newest readable snapshots across all students. Files
    /// that cannot be read or parsed are logged and skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistorySnapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem.starts_with(HISTORY_PREFIX) || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some((_, stamp)) = stem.rsplit_once('_') {
                files.push((stamp.to_string(), path.clone()));
            }
        }
        files.sort_by(|a, b| b.cmp(a));

        let mut snapshots = Vec::new();
        for (_, path) in files {
            if snapshots.len() == limit {
                break;
            }
            match read_snapshot(&path) {
                Ok(predictions) => snapshots.push(HistorySnapshot { predictions }),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable prediction snapshot"),
            }
        }
        Ok(snapshots)
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<PredictionRecord>> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}
