use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Not enough data to train or predict. Always recoverable: the caller can
/// retry with a different scope once more records exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,
}

impl DataError {
    pub fn training() -> Self {
        Self {
            error: "not enough data to train the model".to_string(),
            student_id: None,
            course_id: None,
        }
    }

    pub fn student(student_id: i64) -> Self {
        Self {
            error: format!("not enough data for student {student_id}"),
            student_id: Some(student_id),
            course_id: None,
        }
    }

    pub fn course(student_id: i64, course_id: i64) -> Self {
        Self {
            error: format!("no prediction available for student {student_id} in course {course_id}"),
            student_id: Some(student_id),
            course_id: Some(course_id),
        }
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

impl std::error::Error for DataError {}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("invalid record for student {student_id}, course {course_id}, period {period:?}: {field}={value} ({reason})")]
    InvalidRecord {
        student_id: i64,
        course_id: i64,
        period: String,
        field: &'static str,
        value: f64,
        reason: String,
    },

    #[error("model artifact {} is unreadable: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },

    #[error("training failed: {0}")]
    Training(String),

    #[error("record source failed: {0:#}")]
    Source(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    #[cfg(test)]
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(self, EngineError::Data(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
