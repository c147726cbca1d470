use chrono::{DateTime, Timelike, Utc};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{DataError, EngineError, Result};
use crate::estimator::ModelKind;
use crate::features::{self, FeatureMode};
use crate::models::{
    legacy_features, AdvancedTrainingReport, LegacyRow, PredictionRecord, PredictionReport,
    TrainingReport,
};
use crate::risk;
use crate::source::{fetch_valid, RecordScope, RecordSource};
use crate::store::{ArtifactStore, HistoryStore};
use crate::trainer::{self, FeatureSet, ModelHandle};
use crate::trend;

/// Kind fitted by the `train` command when none is named.
pub const DEFAULT_KIND: &str = "random_forest";

/// Inputs to one prediction, independent of the model that produced it.
#[derive(Debug, Clone, Copy)]
pub struct PredictionInput<'a> {
    pub student_id: i64,
    pub student_name: &'a str,
    pub course: Option<(i64, &'a str)>,
    pub current_grade: f64,
    pub predicted_grade: f64,
    pub grade_trend: f64,
    pub attendance_rate: f64,
    pub participation_score: f64,
}

/// Turns a raw prediction into a classified, explained record.
pub fn explain(input: &PredictionInput<'_>, config: &EngineConfig) -> PredictionRecord {
    let grade_difference = input.predicted_grade - input.current_grade;
    let predicted_ten_point = config.to_ten_point(input.predicted_grade);
    let category = risk::performance_category(predicted_ten_point);
    let assessment = risk::assess(
        input.attendance_rate,
        input.participation_score,
        input.grade_trend,
        category,
    );
    let recommendations = risk::recommendations(&assessment.factors, predicted_ten_point);

    PredictionRecord {
        student_id: input.student_id,
        student_name: input.student_name.to_string(),
        course_id: input.course.map(|(id, _)| id),
        course_name: input.course.map(|(_, name)| name.to_string()),
        current_grade: input.current_grade,
        predicted_grade: input.predicted_grade,
        grade_difference,
        trend_direction: risk::trend_direction(grade_difference),
        performance_category: category,
        risk_level: assessment.level,
        risk_factors: assessment.factors.iter().map(ToString::to_string).collect(),
        recommendations: recommendations.iter().map(ToString::to_string).collect(),
        attendance_rate: input.attendance_rate,
        participation_score: input.participation_score,
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub report: PredictionReport,
    /// The model that produced the report; pass it to later calls to reuse it.
    pub model: ModelHandle,
}

/// Training and prediction over a record source. Holds no model state:
/// models travel as `ModelHandle` values.
pub struct Engine<S: RecordSource> {
    source: S,
    artifacts: ArtifactStore,
    history: HistoryStore,
    config: EngineConfig,
}

fn now() -> DateTime<Utc> {
    let now = Utc::now();
    // artifact names carry milliseconds only
    now.with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(now)
}

impl<S: RecordSource> Engine<S> {
    pub fn new(source: S, config: EngineConfig) -> Self {
        Self {
            source,
            artifacts: ArtifactStore::new(&config.model_dir),
            history: HistoryStore::new(&config.history_dir),
            config,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Fits a student-level model. The model is returned, not persisted.
    pub fn train(&self, kind: &str) -> Result<(TrainingReport, ModelHandle)> {
        let kind = ModelKind::parse(kind, &self.config);
        let records = fetch_valid(&self.source, &RecordScope::All)?;
        let rows = features::build_legacy(&records, &RecordScope::All).ok_or_else(DataError::training)?;

        let model = trainer::fit_legacy(&rows, &kind, &self.config, now())?;
        let handle = ModelHandle::new(model);
        let report = TrainingReport {
            message: format!("model {} trained on {} students", kind.name(), rows.len()),
            model_id: handle.id().to_string(),
            samples: rows.len(),
        };
        Ok((report, handle))
    }

    /// Fits a per-course model with a hold-out evaluation and persists it.
    pub fn train_advanced(&self, kind: &str) -> Result<(AdvancedTrainingReport, ModelHandle)> {
        let kind = ModelKind::parse(kind, &self.config);
        let records = fetch_valid(&self.source, &RecordScope::All)?;
        let rows = trend::extract(&records);
        let table = features::build(&rows, FeatureMode::Training, &RecordScope::All)
            .ok_or_else(DataError::training)?;

        let fit = trainer::fit_advanced(&table, &kind, &self.config, now())?;
        let feature_importance = if kind.is_tree_based() {
            fit.model.feature_importances()
        } else {
            None
        };
        let handle = ModelHandle::new(fit.model);

        let message = match self.artifacts.save(handle.model()) {
            Ok(_) => format!("model {} trained and saved", kind.name()),
            Err(err) => {
                // the in-memory model stays usable for this process
                warn!(error = %err, model = %handle.id(), "failed to persist model artifact");
                format!("model {} trained but not saved: {err}", kind.name())
            }
        };

        let report = AdvancedTrainingReport {
            message,
            model_artifact_id: handle.id().to_string(),
            metrics: fit.metrics,
            feature_importance,
            train_samples: fit.train_samples,
            test_samples: fit.test_samples,
        };
        Ok((report, handle))
    }

    /// Uses `loaded` when it is a per-course model, else the newest
    /// artifact, else trains a fresh one.
    pub fn resolve_model(&self, loaded: Option<ModelHandle>) -> Result<ModelHandle> {
        if let Some(handle) = loaded.filter(|h| h.feature_set() == FeatureSet::PerCourse) {
            return Ok(handle);
        }
        match self.artifacts.load_latest() {
            Ok(Some(model)) => {
                let handle = ModelHandle::new(model);
                info!(model = %handle.id(), "loaded model artifact");
                return Ok(handle);
            }
            Ok(None) => info!("no model artifact found, training one"),
            Err(err @ EngineError::Artifact { .. }) => {
                warn!(error = %err, "model artifact unusable, training a fresh one");
            }
            Err(err) => return Err(err),
        }
        self.train_advanced(&self.config.on_demand_kind).map(|(_, handle)| handle)
    }

    fn resolve_legacy_model(&self, loaded: Option<ModelHandle>) -> Result<ModelHandle> {
        match loaded.filter(|h| h.feature_set() == FeatureSet::Legacy) {
            Some(handle) => Ok(handle),
            None => self.train(&self.config.on_demand_kind).map(|(_, handle)| handle),
        }
    }

    pub fn predict(
        &self,
        model: Option<ModelHandle>,
        student_id: i64,
        course_id: Option<i64>,
    ) -> Result<Prediction> {
        let scope = RecordScope::for_request(student_id, course_id);
        let records = fetch_valid(&self.source, &RecordScope::Student(student_id))?;
        if records.is_empty() {
            return Err(DataError::student(student_id).into());
        }

        let rows = trend::extract(&records);
        let (mut predictions, handle) = match features::build(&rows, FeatureMode::Inference, &scope) {
            Some(table) => {
                let handle = self.resolve_model(model)?;
                let predicted = handle.model().predict(&table.features())?;
                let predictions = table
                    .rows
                    .iter()
                    .zip(&table.metadata)
                    .zip(predicted.iter())
                    .map(|((row, meta), &predicted_grade)| {
                        self.explain_checked(PredictionInput {
                            student_id: meta.student_id,
                            student_name: &meta.student_name,
                            course: Some((meta.course_id, meta.course_name.as_str())),
                            current_grade: meta.last_grade,
                            predicted_grade,
                            grade_trend: row.grade_trend,
                            attendance_rate: row.attendance_rate,
                            participation_score: row.participation_score,
                        })
                    })
                    .collect::<Vec<_>>();
                (predictions, handle)
            }
            None => {
                let rows = features::build_legacy(&records, &scope).ok_or_else(|| match course_id {
                    Some(course_id) => DataError::course(student_id, course_id),
                    None => DataError::student(student_id),
                })?;
                info!(student_id, "per-course history too short, using student-level model");
                let handle = self.resolve_legacy_model(model)?;
                let course = course_id.and_then(|id| {
                    records
                        .iter()
                        .find(|r| r.course_id == id)
                        .map(|r| (id, r.course_name.as_str()))
                });
                (self.predict_legacy(&handle, &rows, course)?, handle)
            }
        };

        if let Some(course_id) = course_id {
            predictions.retain(|p| p.course_id == Some(course_id));
            if predictions.is_empty() {
                return Err(DataError::course(student_id, course_id).into());
            }
        }

        let prediction_date = Utc::now();
        if let Err(err) = self.history.append(student_id, &predictions, prediction_date) {
            warn!(error = %err, student_id, "failed to write prediction history");
        }

        Ok(Prediction {
            report: PredictionReport {
                student_id,
                prediction_count: predictions.len(),
                predictions,
                prediction_date,
                model_id: handle.id().to_string(),
            },
            model: handle,
        })
    }

    fn predict_legacy(
        &self,
        handle: &ModelHandle,
        rows: &[LegacyRow],
        course: Option<(i64, &str)>,
    ) -> Result<Vec<PredictionRecord>> {
        let predicted = handle.model().predict(&legacy_features(rows))?;
        Ok(rows
            .iter()
            .zip(predicted.iter())
            .map(|(row, &predicted_grade)| {
                self.explain_checked(PredictionInput {
                    student_id: row.student_id,
                    student_name: &row.student_name,
                    course,
                    current_grade: row.avg_grade,
                    predicted_grade,
                    grade_trend: 0.0,
                    attendance_rate: row.attendance_rate,
                    participation_score: row.participation_score,
                })
            })
            .collect())
    }

    fn explain_checked(&self, input: PredictionInput<'_>) -> PredictionRecord {
        if !(0.0..=self.config.grade_scale).contains(&input.predicted_grade) {
            warn!(
                student_id = input.student_id,
                predicted = input.predicted_grade,
                "prediction outside the grade scale"
            );
        }
        explain(&input, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{sample_record, PerformanceCategory, Record, RiskLevel, TrendDirection};
    use crate::source::MemorySource;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn engine(records: Vec<Record>) -> (Engine<MemorySource>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            n_estimators: 20,
            ..EngineConfig::with_dirs(dir.path().join("models"), dir.path().join("predictions"))
        };
        (Engine::new(MemorySource::new(records), config), dir)
    }

    fn three_students() -> Vec<Record> {
        let mut records = Vec::new();
        for (student_id, grades) in [(1, [60.0, 55.0]), (2, [80.0, 85.0]), (3, [40.0, 38.0])] {
            records.push(sample_record(student_id, 10, "Q1-2025", grades[0]));
            records.push(sample_record(student_id, 10, "Q2-2025", grades[1]));
        }
        records
    }

    fn cohort() -> Vec<Record> {
        let mut records = Vec::new();
        for student_id in 1..=12 {
            for (period, step) in [("Q1-2025", 0.0), ("Q2-2025", 1.0), ("Q3-2025", 2.0)] {
                let base = 40.0 + 4.0 * student_id as f64;
                let slope = (student_id % 5) as f64 - 2.0;
                let mut record = sample_record(student_id, 10 + student_id % 2, period, base + slope * step);
                record.attendance_rate = 60.0 + 3.0 * student_id as f64;
                record.participation_score = 3.0 + (student_id % 7) as f64;
                records.push(record);
            }
        }
        records
    }

    #[test]
    fn declining_and_rising_students_are_told_apart() {
        let (engine, _dir) = engine(three_students());
        let (report, handle) = engine.train_advanced("linear_regression").unwrap();
        assert_eq!(report.train_samples, 3);
        assert!(report.feature_importance.is_none());

        let declining = engine.predict(Some(handle.clone()), 3, None).unwrap().report;
        let record = &declining.predictions[0];
        assert!(record.risk_level >= RiskLevel::Medium);
        assert!(record.risk_factors.contains(&"strongly negative grade trend".to_string()));
        assert!(record.recommendations.contains(&"reinforce weak topics".to_string()));

        let rising = engine.predict(Some(handle), 2, None).unwrap().report;
        let record = &rising.predictions[0];
        assert_eq!(record.current_grade, 85.0);
        assert_eq!(record.trend_direction, TrendDirection::Rising);
        assert!(record
            .risk_factors
            .iter()
            .all(|f| f != "strongly negative grade trend" && f != "declining grades"));
    }

    #[test]
    fn on_demand_model_sees_the_rise_and_the_decline() {
        let (engine, _dir) = engine(three_students());

        let rising = engine.predict(None, 2, None).unwrap();
        assert!(rising.model.id().starts_with("linear_regression_"));
        let record = &rising.report.predictions[0];
        assert_eq!(record.current_grade, 85.0);
        assert!(record.predicted_grade > 85.5);
        assert_eq!(record.trend_direction, TrendDirection::Rising);

        let declining = engine.predict(None, 3, None).unwrap();
        assert_eq!(declining.model.id(), rising.model.id());
        let record = &declining.report.predictions[0];
        assert_eq!(record.current_grade, 38.0);
        assert!(record.risk_level >= RiskLevel::Medium);
        assert!(record.risk_factors.contains(&"strongly negative grade trend".to_string()));
        assert!(record.recommendations.contains(&"reinforce weak topics".to_string()));
    }

    #[test]
    fn unknown_student_is_a_data_error() {
        let (engine, _dir) = engine(three_students());
        let err = engine.predict(None, 99, None).unwrap_err();
        match err {
            EngineError::Data(data) => assert_eq!(data.student_id, Some(99)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_source_cannot_train() {
        let (engine, _dir) = engine(Vec::new());
        assert!(engine.train("random_forest").unwrap_err().is_data_insufficiency());
        assert!(engine.train_advanced("random_forest").unwrap_err().is_data_insufficiency());
    }

    #[test]
    fn predict_trains_and_persists_on_demand() {
        let (engine, dir) = engine(cohort());
        let prediction = engine.predict(None, 4, None).unwrap();
        assert_eq!(prediction.report.prediction_count, 1);
        assert!(prediction.model.id().starts_with("linear_regression_"));

        let artifacts: Vec<_> = std::fs::read_dir(dir.path().join("models")).unwrap().collect();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(engine.history().recent(10).unwrap().len(), 1);
    }

    #[test]
    fn predictions_are_repeatable_without_retraining() {
        let (engine, _dir) = engine(cohort());
        let first = engine.predict(None, 5, None).unwrap();
        let second = engine.predict(None, 5, None).unwrap();
        assert_eq!(first.report.predictions, second.report.predictions);
        assert_eq!(first.report.model_id, second.report.model_id);
    }

    #[test]
    fn reloaded_artifact_predicts_identically() {
        let (engine, _dir) = engine(cohort());
        let (_, trained) = engine.train_advanced("gradient_boosting").unwrap();
        let reloaded = engine.resolve_model(None).unwrap();
        assert_eq!(reloaded.id(), trained.id());

        let records = fetch_valid(&engine.source, &RecordScope::All).unwrap();
        let table = features::build(&trend::extract(&records), FeatureMode::Inference, &RecordScope::All).unwrap();
        let x = table.features();
        let before = trained.model().predict(&x).unwrap();
        let after = reloaded.model().predict(&x).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn corrupt_artifact_is_replaced_by_fresh_training() {
        let (engine, dir) = engine(cohort());
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("random_forest_20990101_000000_000.bin"), b"garbage").unwrap();

        let handle = engine.resolve_model(None).unwrap();
        assert!(handle.id().starts_with("linear_regression_"));
        assert_ne!(handle.id(), "random_forest_20990101_000000_000");
    }

    #[test]
    fn course_filter_keeps_only_the_requested_course() {
        let mut records = cohort();
        records.push(sample_record(4, 20, "Q1-2025", 70.0));
        records.push(sample_record(4, 20, "Q2-2025", 72.0));
        let (engine, _dir) = engine(records);

        let all = engine.predict(None, 4, None).unwrap();
        assert_eq!(all.report.prediction_count, 2);

        let scoped = engine.predict(Some(all.model.clone()), 4, Some(20)).unwrap();
        assert_eq!(scoped.report.prediction_count, 1);
        assert_eq!(scoped.report.predictions[0].course_id, Some(20));

        let err = engine.predict(Some(all.model), 4, Some(77)).unwrap_err();
        assert!(err.is_data_insufficiency());
    }

    #[test]
    fn single_period_students_fall_back_to_student_model() {
        let mut records = cohort();
        let mut newcomer = sample_record(50, 10, "Q3-2025", 45.0);
        newcomer.attendance_rate = 65.0;
        newcomer.participation_score = 3.0;
        records.push(newcomer);
        let (engine, _dir) = engine(records);

        let prediction = engine.predict(None, 50, None).unwrap();
        assert!(prediction.model.id().starts_with("legacy_linear_regression_"));
        let record = &prediction.report.predictions[0];
        assert_eq!(record.course_id, None);
        assert_eq!(record.current_grade, 45.0);
        assert_eq!(record.risk_level, RiskLevel::High);
        assert!(record.recommendations.contains(&"improve attendance".to_string()));
    }

    #[test]
    fn history_write_failure_does_not_fail_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let config = EngineConfig {
            n_estimators: 10,
            ..EngineConfig::with_dirs(dir.path().join("models"), blocker.join("history"))
        };
        let engine = Engine::new(MemorySource::new(cohort()), config);

        let prediction = engine.predict(None, 2, None).unwrap();
        assert_eq!(prediction.report.prediction_count, 1);
    }

    #[test]
    fn explain_classifies_on_the_ten_point_scale() {
        let config = EngineConfig::default();
        let record = explain(
            &PredictionInput {
                student_id: 1,
                student_name: "Ana",
                course: Some((10, "Algebra")),
                current_grade: 80.0,
                predicted_grade: 85.0,
                grade_trend: 0.0,
                attendance_rate: 95.0,
                participation_score: 9.0,
            },
            &config,
        );
        assert_eq!(record.performance_category, PerformanceCategory::Excellent);
        assert_eq!(record.trend_direction, TrendDirection::Rising);
        assert_eq!(record.risk_level, RiskLevel::Low);
        assert_eq!(record.grade_difference, 5.0);
        assert_eq!(
            record.recommendations,
            vec!["keep up the good work and consider extra activities".to_string()]
        );
    }
}
