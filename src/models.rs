use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const GRADE_RANGE: (f64, f64) = (0.0, 100.0);
pub const ATTENDANCE_RANGE: (f64, f64) = (0.0, 100.0);
pub const PARTICIPATION_RANGE: (f64, f64) = (0.0, 10.0);

/// One observed academic data point for a student in a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub student_id: i64,
    pub student_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub period: String,
    pub grade: f64,
    pub attendance_rate: f64,
    pub participation_score: f64,
    #[serde(default)]
    pub date_recorded: Option<NaiveDate>,
}

impl Record {
    /// Rejects rows the pipeline must never see. Values are not clamped.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.period.trim().is_empty() {
            return Err(self.invalid("period", f64::NAN, "period label is empty"));
        }
        check_range(self, "grade", self.grade, GRADE_RANGE)?;
        check_range(self, "attendance_rate", self.attendance_rate, ATTENDANCE_RANGE)?;
        check_range(
            self,
            "participation_score",
            self.participation_score,
            PARTICIPATION_RANGE,
        )?;
        Ok(())
    }

    fn invalid(&self, field: &'static str, value: f64, reason: &str) -> EngineError {
        EngineError::InvalidRecord {
            student_id: self.student_id,
            course_id: self.course_id,
            period: self.period.clone(),
            field,
            value,
            reason: reason.to_string(),
        }
    }
}

fn check_range(
    record: &Record,
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), EngineError> {
    if !value.is_finite() {
        return Err(record.invalid(field, value, "value is not finite"));
    }
    if value < min || value > max {
        return Err(record.invalid(field, value, &format!("expected {min}..={max}")));
    }
    Ok(())
}

/// A record decorated with its period rank and the trends of its
/// (student, course) group.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRecord {
    pub record: Record,
    pub period_num: usize,
    pub grade_trend: f64,
    pub attendance_trend: f64,
    pub participation_trend: f64,
}

pub const FEATURE_NAMES: [&str; 7] = [
    "attendance_rate",
    "participation_score",
    "avg_grade",
    "grade_trend",
    "previous_grade",
    "attendance_trend",
    "participation_trend",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub attendance_rate: f64,
    pub participation_score: f64,
    pub avg_grade: f64,
    pub grade_trend: f64,
    pub previous_grade: f64,
    pub attendance_trend: f64,
    pub participation_trend: f64,
}

impl FeatureRow {
    /// Values in `FEATURE_NAMES` order.
    pub fn values(&self) -> [f64; 7] {
        [
            self.attendance_rate,
            self.participation_score,
            self.avg_grade,
            self.grade_trend,
            self.previous_grade,
            self.attendance_trend,
            self.participation_trend,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub student_id: i64,
    pub student_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub last_period: String,
    pub last_grade: f64,
}

/// Features, targets and metadata, index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    pub targets: Vec<f64>,
    pub metadata: Vec<Metadata>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn features(&self) -> Array2<f64> {
        let flat: Vec<f64> = self.rows.iter().flat_map(|row| row.values()).collect();
        Array2::from_shape_vec((self.rows.len(), FEATURE_NAMES.len()), flat)
            .unwrap_or_else(|_| Array2::zeros((0, FEATURE_NAMES.len())))
    }

    pub fn targets(&self) -> Array1<f64> {
        Array1::from_vec(self.targets.clone())
    }
}

pub const LEGACY_FEATURE_NAMES: [&str; 2] = ["attendance_rate", "participation_score"];

/// Student-level aggregate used by the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyRow {
    pub student_id: i64,
    pub student_name: String,
    pub attendance_rate: f64,
    pub participation_score: f64,
    pub avg_grade: f64,
}

impl LegacyRow {
    pub fn values(&self) -> [f64; 2] {
        [self.attendance_rate, self.participation_score]
    }
}

pub fn legacy_features(rows: &[LegacyRow]) -> Array2<f64> {
    let flat: Vec<f64> = rows.iter().flat_map(|row| row.values()).collect();
    Array2::from_shape_vec((rows.len(), LEGACY_FEATURE_NAMES.len()), flat)
        .unwrap_or_else(|_| Array2::zeros((0, LEGACY_FEATURE_NAMES.len())))
}

pub fn legacy_targets(rows: &[LegacyRow]) -> Array1<f64> {
    rows.iter().map(|row| row.avg_grade).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    #[serde(rename = "subir")]
    Rising,
    #[serde(rename = "bajar")]
    Falling,
    #[serde(rename = "mantener")]
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceCategory {
    #[serde(rename = "Excelente")]
    Excellent,
    #[serde(rename = "Bueno")]
    Good,
    #[serde(rename = "Aceptable")]
    Acceptable,
    #[serde(rename = "Bajo")]
    Low,
}

/// Ordered so that escalation is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Bajo")]
    Low,
    #[serde(rename = "Medio")]
    Medium,
    #[serde(rename = "Alto")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub student_id: i64,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub course_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub course_name: Option<String>,
    pub current_grade: f64,
    pub predicted_grade: f64,
    pub grade_difference: f64,
    pub trend_direction: TrendDirection,
    pub performance_category: PerformanceCategory,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub attendance_rate: f64,
    pub participation_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionReport {
    pub student_id: i64,
    pub prediction_count: usize,
    pub predictions: Vec<PredictionRecord>,
    pub prediction_date: DateTime<Utc>,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub train_r2: f64,
    pub test_r2: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Result of the student-level training path.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub message: String,
    pub model_id: String,
    pub samples: usize,
}

/// Result of the per-course training path.
#[derive(Debug, Clone, Serialize)]
pub struct AdvancedTrainingReport {
    pub message: String,
    pub model_artifact_id: String,
    pub metrics: RegressionMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub train_samples: usize,
    pub test_samples: usize,
}

#[cfg(test)]
pub(crate) fn sample_record(
    student_id: i64,
    course_id: i64,
    period: &str,
    grade: f64,
) -> Record {
    Record {
        student_id,
        student_name: format!("Student {student_id}"),
        course_id,
        course_name: format!("Course {course_id}"),
        period: period.to_string(),
        grade,
        attendance_rate: 90.0,
        participation_score: 7.0,
        date_recorded: None,
    }
}
