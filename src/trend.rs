use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{Record, TrendRecord};

/// Sort key for period labels. `Q1-2025` style labels order by
/// (year, prefix, number); anything else sorts lexically after them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PeriodKey {
    Term { year: u32, prefix: String, number: u32 },
    Label(String),
}

fn period_key(label: &str) -> PeriodKey {
    let parsed = label.split_once('-').and_then(|(term, year)| {
        let year: u32 = year.trim().parse().ok()?;
        let term = term.trim();
        let split = term.find(|c: char| c.is_ascii_digit())?;
        let (prefix, number) = term.split_at(split);
        let number: u32 = number.parse().ok()?;
        Some(PeriodKey::Term {
            year,
            prefix: prefix.to_ascii_uppercase(),
            number,
        })
    });
    parsed.unwrap_or_else(|| PeriodKey::Label(label.to_string()))
}

pub fn compare_periods(a: &str, b: &str) -> Ordering {
    period_key(a).cmp(&period_key(b)).then_with(|| a.cmp(b))
}

/// Dense rank of every distinct period label, starting at 0.
pub fn period_ranks<'a>(records: impl IntoIterator<Item = &'a Record>) -> HashMap<String, usize> {
    let mut labels: Vec<&str> = records
        .into_iter()
        .map(|record| record.period.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    labels.sort_by(|a, b| compare_periods(a, b));
    labels
        .into_iter()
        .enumerate()
        .map(|(rank, label)| (label.to_string(), rank))
        .collect()
}

/// Least-squares slope of `ys` against `xs`; zero when no trend is
/// computable (fewer than two points or a single x value).
pub fn slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance == 0.0 {
        0.0
    } else {
        covariance / variance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Trends {
    pub grade: f64,
    pub attendance: f64,
    pub participation: f64,
}

/// Trends of one (student, course) group given `(period_num, record)` rows.
pub fn group_trends(rows: &[(usize, &Record)]) -> Trends {
    if rows.len() < 2 {
        return Trends::default();
    }
    let xs: Vec<f64> = rows.iter().map(|(period_num, _)| *period_num as f64).collect();
    let metric = |f: fn(&Record) -> f64| -> Vec<f64> { rows.iter().map(|(_, r)| f(r)).collect() };
    Trends {
        grade: slope(&xs, &metric(|r| r.grade)),
        attendance: slope(&xs, &metric(|r| r.attendance_rate)),
        participation: slope(&xs, &metric(|r| r.participation_score)),
    }
}

/// Ranks periods and attaches per-(student, course) trends. Output is
/// grouped by (student, course) and sorted by period rank within a group.
/// An empty input yields an empty output.
pub fn extract(records: &[Record]) -> Vec<TrendRecord> {
    if records.is_empty() {
        return Vec::new();
    }

    let ranks = period_ranks(records);
    let mut groups: BTreeMap<(i64, i64), Vec<(usize, &Record)>> = BTreeMap::new();
    for record in records {
        let period_num = ranks[&record.period];
        groups
            .entry((record.student_id, record.course_id))
            .or_default()
            .push((period_num, record));
    }

    let mut output = Vec::with_capacity(records.len());
    for rows in groups.values_mut() {
        rows.sort_by_key(|(period_num, _)| *period_num);
        let trends = group_trends(rows);
        output.extend(rows.iter().map(|(period_num, record)| TrendRecord {
            record: (*record).clone(),
            period_num: *period_num,
            grade_trend: trends.grade,
            attendance_trend: trends.attendance,
            participation_trend: trends.participation,
        }));
    }

    output
}
