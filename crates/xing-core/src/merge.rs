//! Merging externally imported rows into the record set

use crate::record::{CrossingRecord, Field, FieldSet};
use std::collections::{BTreeSet, HashMap};

/// One imported row: its values and the columns it actually carried
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub fields: FieldSet,
    pub present: BTreeSet<Field>,
}

impl ImportRow {
    /// A row carrying only a crossing code
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            fields: FieldSet::with_code(code),
            present: BTreeSet::from([Field::Crossing]),
        }
    }

    /// A row carrying every field, blanks included
    pub fn complete(fields: FieldSet) -> Self {
        let mut present: BTreeSet<Field> = Field::TRACKED.into_iter().collect();
        present.insert(Field::Crossing);
        Self { fields, present }
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.fields.set(field, value);
        self.present.insert(field);
    }

    pub fn carries(&self, field: Field) -> bool {
        self.present.contains(&field)
    }
}

/// Outcome of merging imported rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Codes of existing records whose fields were overwritten
    pub updated: Vec<String>,
    /// Codes of records appended without instances
    pub appended: Vec<String>,
    /// Rows ignored because they had no crossing code
    pub ignored: usize,
}

/// Merge `rows` into `records`, keyed by crossing code.
///
/// A row matching an existing record overwrites the tracked fields it
/// carries and nothing else; the record's code and instance linkage are
/// never changed. Any other row is appended as an unplaced record, which
/// must be placed before the next apply for it to reach the document.
pub fn merge_imported(records: &mut Vec<CrossingRecord>, rows: Vec<ImportRow>) -> MergeReport {
    let mut report = MergeReport::default();
    let mut positions: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.key(), i))
        .collect();

    for ImportRow { fields: mut row, present } in rows {
        row.crossing = row.crossing.trim().to_string();
        let key = row.key();
        if key.is_empty() {
            report.ignored += 1;
            continue;
        }

        match positions.get(&key) {
            Some(&index) => {
                let record = &mut records[index];
                for field in Field::TRACKED.into_iter().filter(|f| present.contains(f)) {
                    record.fields.set(field, row.get(field));
                }
                report.updated.push(record.code().to_string());
            }
            None => {
                report.appended.push(row.crossing.clone());
                positions.insert(key, records.len());
                records.push(CrossingRecord::unplaced(row));
            }
        }
    }

    tracing::info!(
        "merged import: {} updated, {} appended, {} ignored",
        report.updated.len(),
        report.appended.len(),
        report.ignored
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{GroupState, InstanceRef};

    fn placed(code: &str, instance: u64) -> CrossingRecord {
        let mut record = CrossingRecord::unplaced(FieldSet {
            owner: "Co A".to_string(),
            location: "Mile 1".to_string(),
            ..FieldSet::with_code(code)
        });
        record.attach(InstanceRef(instance));
        record
    }

    #[test]
    fn test_existing_code_overwrites_fields_only() {
        let mut records = vec![placed("X1", 1), placed("X3", 3)];
        let before = records[1].clone();

        let row = ImportRow::complete(FieldSet {
            owner: "Co A".to_string(),
            location: "Mile 9".to_string(),
            ..FieldSet::with_code("x3")
        });
        let report = merge_imported(&mut records, vec![row]);

        assert_eq!(report.updated, vec!["X3"]);
        assert_eq!(records[1].fields.location, "Mile 9");
        assert_eq!(records[1].fields.owner, "Co A");
        assert_eq!(records[1].code(), "X3");
        assert_eq!(records[1].all_instances, before.all_instances);
        assert_eq!(records[1].canonical_instance, before.canonical_instance);
    }

    #[test]
    fn test_missing_columns_keep_existing_values() {
        let mut records = vec![placed("X3", 3)];

        let row = ImportRow::new("X3").with(Field::Location, "Mile 9");
        merge_imported(&mut records, vec![row]);

        assert_eq!(records[0].fields.location, "Mile 9");
        assert_eq!(records[0].fields.owner, "Co A");
    }

    #[test]
    fn test_carried_blank_clears_field() {
        let mut records = vec![placed("X1", 1)];

        let row = ImportRow::new("X1").with(Field::Owner, "");
        merge_imported(&mut records, vec![row]);

        assert_eq!(records[0].fields.owner, "");
        assert_eq!(records[0].fields.location, "Mile 1");
    }

    #[test]
    fn test_unknown_code_appends_unplaced_record() {
        let mut records = vec![placed("X1", 1)];

        let report = merge_imported(&mut records, vec![ImportRow::new(" X8 ")]);

        assert_eq!(report.appended, vec!["X8"]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].code(), "X8");
        assert!(records[1].all_instances.is_empty());
        assert_eq!(records[1].canonical_instance, None);
        assert_eq!(records[1].state, GroupState::Resolved);
    }

    #[test]
    fn test_repeated_rows_last_wins() {
        let mut records = Vec::new();
        let rows = vec![
            ImportRow::new("X2").with(Field::Owner, "First"),
            ImportRow::new("x2").with(Field::Owner, "Second"),
            ImportRow::new(""),
        ];

        let report = merge_imported(&mut records, rows);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.owner, "Second");
        assert_eq!(records[0].code(), "X2");
        assert_eq!(report.ignored, 1);
    }
}
