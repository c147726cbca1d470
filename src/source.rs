use crate::error::{EngineError, Result};
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    All,
    Student(i64),
    StudentCourse(i64, i64),
}

impl RecordScope {
    pub fn for_request(student_id: i64, course_id: Option<i64>) -> Self {
        match course_id {
            Some(course_id) => RecordScope::StudentCourse(student_id, course_id),
            None => RecordScope::Student(student_id),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match *self {
            RecordScope::All => true,
            RecordScope::Student(student_id) => record.student_id == student_id,
            RecordScope::StudentCourse(student_id, course_id) => {
                record.student_id == student_id && record.course_id == course_id
            }
        }
    }
}

/// Read-only access to the academic record extract.
pub trait RecordSource {
    fn records(&self, scope: &RecordScope) -> anyhow::Result<Vec<Record>>;
}

/// Records held in memory, typically a snapshot of Postgres or a CSV file.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl RecordSource for MemorySource {
    fn records(&self, scope: &RecordScope) -> anyhow::Result<Vec<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|record| scope.matches(record))
            .cloned()
            .collect())
    }
}

/// Fetches and validates records; a single bad row fails the whole call.
pub fn fetch_valid(source: &dyn RecordSource, scope: &RecordScope) -> Result<Vec<Record>> {
    let records = source.records(scope).map_err(EngineError::Source)?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;

    #[test]
    fn scopes_filter_by_student_and_course() {
        let source = MemorySource::new(vec![
            sample_record(1, 10, "Q1-2025", 70.0),
            sample_record(1, 11, "Q1-2025", 75.0),
            sample_record(2, 10, "Q1-2025", 80.0),
        ]);

        assert_eq!(source.records(&RecordScope::All).unwrap().len(), 3);
        assert_eq!(source.records(&RecordScope::Student(1)).unwrap().len(), 2);
        let scoped = source
            .records(&RecordScope::for_request(1, Some(11)))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].grade, 75.0);
    }

    #[test]
    fn fetch_valid_rejects_out_of_range_rows() {
        let mut bad = sample_record(3, 10, "Q1-2025", 70.0);
        bad.participation_score = 12.0;
        let source = MemorySource::new(vec![sample_record(1, 10, "Q1-2025", 70.0), bad]);

        let err = fetch_valid(&source, &RecordScope::All).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecord { student_id: 3, .. }));
    }
}
