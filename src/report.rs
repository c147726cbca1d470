use std::fmt::Write;

use crate::models::{PredictionRecord, PredictionReport, RiskLevel};
use crate::store::HistorySnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskSummary {
    pub level: RiskLevel,
    pub count: usize,
    pub avg_predicted: f64,
}

pub fn summarize_by_risk(predictions: &[PredictionRecord]) -> Vec<RiskSummary> {
    let mut summaries = Vec::new();
    for level in [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low] {
        let matching: Vec<&PredictionRecord> =
            predictions.iter().filter(|p| p.risk_level == level).collect();
        if matching.is_empty() {
            continue;
        }
        let total: f64 = matching.iter().map(|p| p.predicted_grade).sum();
        summaries.push(RiskSummary {
            level,
            count: matching.len(),
            avg_predicted: total / matching.len() as f64,
        });
    }
    summaries
}

fn level_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::High => "Alto",
        RiskLevel::Medium => "Medio",
        RiskLevel::Low => "Bajo",
    }
}

fn course_label(prediction: &PredictionRecord) -> String {
    match (&prediction.course_name, prediction.course_id) {
        (Some(name), Some(id)) => format!("{name} (#{id})"),
        (None, Some(id)) => format!("course #{id}"),
        _ => "all courses".to_string(),
    }
}

pub fn build_report(report: &PredictionReport, recent: &[HistorySnapshot]) -> String {
    let mut output = String::new();
    let student_name = report
        .predictions
        .first()
        .map(|p| p.student_name.as_str())
        .unwrap_or("unknown student");

    let _ = writeln!(output, "# Performance Forecast");
    let _ = writeln!(
        output,
        "Generated for {} (#{}) on {} with model {}",
        student_name,
        report.student_id,
        report.prediction_date.format("%Y-%m-%d %H:%M UTC"),
        report.model_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    for summary in summarize_by_risk(&report.predictions) {
        let _ = writeln!(
            output,
            "- {}: {} courses (avg predicted grade {:.1})",
            level_label(summary.level),
            summary.count,
            summary.avg_predicted
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");

    for prediction in &report.predictions {
        let _ = writeln!(
            output,
            "- {}: current {:.1}, predicted {:.1} ({:+.1}), risk {}",
            course_label(prediction),
            prediction.current_grade,
            prediction.predicted_grade,
            prediction.grade_difference,
            level_label(prediction.risk_level)
        );
        if !prediction.risk_factors.is_empty() {
            let _ = writeln!(output, "  - factors: {}", prediction.risk_factors.join(", "));
        }
        if !prediction.recommendations.is_empty() {
            let _ = writeln!(
                output,
                "  - recommendations: {}",
                prediction.recommendations.join(", ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Predictions");

    let earlier: Vec<&PredictionRecord> = recent
        .iter()
        .flat_map(|snapshot| snapshot.predictions.iter())
        .filter(|p| p.student_id == report.student_id)
        .collect();
    if earlier.is_empty() {
        let _ = writeln!(output, "No earlier predictions recorded.");
    } else {
        for prediction in earlier.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}: predicted {:.1}, risk {}",
                course_label(prediction),
                prediction.predicted_grade,
                level_label(prediction.risk_level)
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PerformanceCategory, TrendDirection};
    use chrono::{TimeZone, Utc};

    fn prediction(course_id: i64, predicted: f64, level: RiskLevel) -> PredictionRecord {
        PredictionRecord {
            student_id: 3,
            student_name: "Kiara Patel".to_string(),
            course_id: Some(course_id),
            course_name: Some(format!("Course {course_id}")),
            current_grade: 40.0,
            predicted_grade: predicted,
            grade_difference: predicted - 40.0,
            trend_direction: TrendDirection::Falling,
            performance_category: PerformanceCategory::Low,
            risk_level: level,
            risk_factors: vec!["strongly negative grade trend".to_string()],
            recommendations: vec!["reinforce weak topics".to_string()],
            attendance_rate: 90.0,
            participation_score: 7.0,
        }
    }

    #[test]
    fn summaries_list_highest_risk_first() {
        let predictions = vec![
            prediction(1, 60.0, RiskLevel::Low),
            prediction(2, 30.0, RiskLevel::High),
            prediction(3, 40.0, RiskLevel::High),
        ];
        let summaries = summarize_by_risk(&predictions);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].level, RiskLevel::High);
        assert_eq!(summaries[0].count, 2);
        assert!((summaries[0].avg_predicted - 35.0).abs() < 1e-12);
    }

    #[test]
    fn report_lists_courses_and_history() {
        let report = PredictionReport {
            student_id: 3,
            prediction_count: 1,
            predictions: vec![prediction(10, 36.5, RiskLevel::High)],
            prediction_date: Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
            model_id: "random_forest_20250601_090000_000".to_string(),
        };
        let recent = vec![HistorySnapshot {
            predictions: vec![prediction(10, 39.0, RiskLevel::Medium)],
        }];

        let output = build_report(&report, &recent);
        assert!(output.contains("Generated for Kiara Patel (#3) on 2025-06-01 09:30 UTC"));
        assert!(output.contains("- Course 10 (#10): current 40.0, predicted 36.5 (-3.5), risk Alto"));
        assert!(output.contains("  - recommendations: reinforce weak topics"));
        assert!(output.contains("- Course 10 (#10): predicted 39.0, risk Medio"));
    }

    #[test]
    fn report_without_history_says_so() {
        let report = PredictionReport {
            student_id: 3,
            prediction_count: 0,
            predictions: Vec::new(),
            prediction_date: Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
            model_id: "linear_regression_20250601_090000_000".to_string(),
        };
        let output = build_report(&report, &[]);
        assert!(output.contains("unknown student"));
        assert!(output.contains("No earlier predictions recorded."));
    }
}
