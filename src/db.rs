use std::path::Path;

use anyhow::Context;
use sqlx::{PgPool, Row};

use crate::models::Record;

/// One row per grade, decorated with the student's attendance and
/// participation inside the grade's period window.
const RECORD_EXTRACT: &str = r#"
    SELECT s.id::BIGINT AS student_id,
           s.first_name || ' ' || s.last_name AS student_name,
           c.id::BIGINT AS course_id,
           c.name AS course_name,
           g.period,
           g.value::DOUBLE PRECISION AS grade,
           COALESCE(att.rate, 0)::DOUBLE PRECISION AS attendance_rate,
           COALESCE(par.score, 0)::DOUBLE PRECISION AS participation_score,
           g.date_recorded
    FROM grades g
    JOIN students s ON s.id = g.student_id
    JOIN courses c ON c.id = g.course_id
    LEFT JOIN periods p ON p.name = g.period
    LEFT JOIN LATERAL (
        SELECT AVG(CASE WHEN a.present THEN 100.0 ELSE 0.0 END) AS rate
        FROM attendances a
        WHERE a.student_id = g.student_id
          AND a.course_id = g.course_id
          AND (p.start_date IS NULL OR a.date >= p.start_date)
          AND (p.end_date IS NULL OR a.date <= p.end_date)
    ) att ON TRUE
    LEFT JOIN LATERAL (
        SELECT AVG(pa.score) AS score
        FROM participations pa
        WHERE pa.student_id = g.student_id
          AND pa.course_id = g.course_id
          AND (p.start_date IS NULL OR pa.date >= p.start_date)
          AND (p.end_date IS NULL OR pa.date <= p.end_date)
    ) par ON TRUE
    ORDER BY s.id, c.id, g.period, g.date_recorded
"#;

pub async fn fetch_records(pool: &PgPool) -> anyhow::Result<Vec<Record>> {
    let rows = sqlx::query(RECORD_EXTRACT)
        .fetch_all(pool)
        .await
        .context("failed to load the academic record extract")?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(Record {
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("student_name")?,
            course_id: row.try_get("course_id")?,
            course_name: row.try_get("course_name")?,
            period: row.try_get("period")?,
            grade: row.try_get("grade")?,
            attendance_rate: row.try_get("attendance_rate")?,
            participation_score: row.try_get("participation_score")?,
            date_recorded: row.try_get("date_recorded")?,
        });
    }

    Ok(records)
}

/// Reads an extract with the `Record` columns as its header.
pub fn load_csv(csv_path: &Path) -> anyhow::Result<Vec<Record>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<Record>().enumerate() {
        let record = result.with_context(|| format!("malformed row {} in {}", line + 2, csv_path.display()))?;
        records.push(record);
    }

    Ok(records)
}
