use std::collections::BTreeMap;

use crate::models::{FeatureRow, FeatureTable, LegacyRow, Metadata, Record, TrendRecord};
use crate::source::RecordScope;
use crate::trend::{self, Trends};

/// Training rows describe the history before the latest period and target
/// the latest grade; inference rows describe the whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureMode {
    Training,
    Inference,
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Mean grade per period rank, in rank order.
fn grades_by_period(rows: &[&TrendRecord]) -> Vec<(usize, f64)> {
    let mut periods: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for row in rows {
        periods.entry(row.period_num).or_default().push(row.record.grade);
    }
    periods
        .into_iter()
        .map(|(period_num, grades)| (period_num, mean(grades)))
        .collect()
}

/// Builds the per-(student, course) table. Groups with fewer than two
/// distinct periods are skipped; `None` means nothing qualified.
pub fn build(rows: &[TrendRecord], mode: FeatureMode, scope: &RecordScope) -> Option<FeatureTable> {
    let mut groups: BTreeMap<(i64, i64), Vec<&TrendRecord>> = BTreeMap::new();
    for row in rows.iter().filter(|row| scope.matches(&row.record)) {
        groups
            .entry((row.record.student_id, row.record.course_id))
            .or_default()
            .push(row);
    }

    let mut table = FeatureTable {
        rows: Vec::new(),
        targets: Vec::new(),
        metadata: Vec::new(),
    };

    for mut group in groups.into_values() {
        group.sort_by_key(|row| row.period_num);
        let periods = grades_by_period(&group);
        if periods.len() < 2 {
            continue;
        }

        let (last_period_num, last_grade) = periods[periods.len() - 1];
        let (window, previous_grade, trends) = match mode {
            FeatureMode::Inference => {
                let first = group[0];
                let trends = Trends {
                    grade: first.grade_trend,
                    attendance: first.attendance_trend,
                    participation: first.participation_trend,
                };
                (group.clone(), last_grade, trends)
            }
            FeatureMode::Training => {
                let window: Vec<&TrendRecord> = group
                    .iter()
                    .copied()
                    .filter(|row| row.period_num < last_period_num)
                    .collect();
                let points: Vec<(usize, &Record)> =
                    window.iter().map(|row| (row.period_num, &row.record)).collect();
                let previous_grade = periods[periods.len() - 2].1;
                (window, previous_grade, trend::group_trends(&points))
            }
        };

        let last = group[group.len() - 1];
        table.rows.push(FeatureRow {
            attendance_rate: mean(window.iter().map(|row| row.record.attendance_rate)),
            participation_score: mean(window.iter().map(|row| row.record.participation_score)),
            avg_grade: mean(window.iter().map(|row| row.record.grade)),
            grade_trend: trends.grade,
            previous_grade,
            attendance_trend: trends.attendance,
            participation_trend: trends.participation,
        });
        table.targets.push(last_grade);
        table.metadata.push(Metadata {
            student_id: last.record.student_id,
            student_name: last.record.student_name.clone(),
            course_id: last.record.course_id,
            course_name: last.record.course_name.clone(),
            last_period: last.record.period.clone(),
            last_grade,
        });
    }

    if table.is_empty() {
        None
    } else {
        Some(table)
    }
}

/// Student-level aggregates ignoring course and trend. Used when the
/// per-course table has nothing for a student.
pub fn build_legacy(records: &[Record], scope: &RecordScope) -> Option<Vec<LegacyRow>> {
    let mut students: BTreeMap<i64, Vec<&Record>> = BTreeMap::new();
    for record in records.iter().filter(|record| scope.matches(record)) {
        students.entry(record.student_id).or_default().push(record);
    }

    let rows: Vec<LegacyRow> = students
        .into_iter()
        .map(|(student_id, records)| LegacyRow {
            student_id,
            student_name: records[0].student_name.clone(),
            attendance_rate: mean(records.iter().map(|r| r.attendance_rate)),
            participation_score: mean(records.iter().map(|r| r.participation_score)),
            avg_grade: mean(records.iter().map(|r| r.grade)),
        })
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;
    use crate::trend::extract;
    use pretty_assertions::assert_eq;

    fn history() -> Vec<Record> {
        vec![
            sample_record(1, 10, "Q1-2025", 60.0),
            sample_record(1, 10, "Q1-2025", 70.0),
            sample_record(1, 10, "Q2-2025", 72.0),
            sample_record(1, 10, "Q3-2025", 80.0),
            sample_record(2, 10, "Q2-2025", 90.0),
            sample_record(3, 11, "Q1-2025", 50.0),
            sample_record(3, 11, "Q2-2025", 40.0),
        ]
    }

    #[test]
    fn inference_rows_end_at_the_latest_grade() {
        let rows = extract(&history());
        let table = build(&rows, FeatureMode::Inference, &RecordScope::All).unwrap();

        // student 2 has a single period and is skipped
        assert_eq!(table.len(), 2);
        assert_eq!(table.metadata[0].student_id, 1);
        assert_eq!(table.metadata[1].student_id, 3);

        let first = &table.rows[0];
        assert_eq!(first.previous_grade, 80.0);
        assert_eq!(table.targets[0], 80.0);
        assert_eq!(table.metadata[0].last_period, "Q3-2025");
        assert!((first.avg_grade - 70.5).abs() < 1e-12);
        assert!((first.grade_trend - rows[0].grade_trend).abs() < 1e-12);
    }

    #[test]
    fn training_rows_exclude_the_target_period() {
        let rows = extract(&history());
        let table = build(&rows, FeatureMode::Training, &RecordScope::All).unwrap();

        let first = &table.rows[0];
        assert_eq!(table.targets[0], 80.0);
        assert_eq!(first.previous_grade, 72.0);
        assert!((first.avg_grade - 202.0 / 3.0).abs() < 1e-12);

        // a single history period leaves no trend
        let third = &table.rows[1];
        assert_eq!(third.grade_trend, 0.0);
        assert_eq!(third.previous_grade, 50.0);
        assert_eq!(table.targets[1], 40.0);
    }

    #[test]
    fn scope_without_qualifying_groups_yields_none() {
        let rows = extract(&history());
        assert!(build(&rows, FeatureMode::Inference, &RecordScope::Student(2)).is_none());
        assert!(build(&[], FeatureMode::Training, &RecordScope::All).is_none());
    }

    #[test]
    fn legacy_rows_aggregate_per_student() {
        let legacy = build_legacy(&history(), &RecordScope::All).unwrap();
        assert_eq!(legacy.len(), 3);
        assert_eq!(legacy[1].student_id, 2);
        assert_eq!(legacy[1].avg_grade, 90.0);
        assert!((legacy[0].avg_grade - 70.5).abs() < 1e-12);

        assert!(build_legacy(&history(), &RecordScope::Student(9)).is_none());
    }
}
