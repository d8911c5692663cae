//! Record set validation, run before anything is written

use crate::error::{Error, Result, ValidationErrors, ValidationIssue};
use crate::record::{CrossingRecord, Field};
use std::collections::HashMap;

/// Check that codes are non-empty and unique (case-insensitive) and that
/// coordinates are empty or decimal numbers. Every issue is reported.
pub fn validate(records: &[CrossingRecord]) -> Result<()> {
    let mut issues = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let key = record.key();
        if key.is_empty() {
            issues.push(ValidationIssue::EmptyCode { index });
        } else if let Some(&first) = seen.get(&key) {
            issues.push(ValidationIssue::DuplicateCode {
                code: record.code().to_string(),
                first,
                second: index,
            });
        } else {
            seen.insert(key, index);
        }

        for field in [Field::Lat, Field::Long] {
            let value = record.fields.get(field);
            if !is_coordinate(value) {
                issues.push(ValidationIssue::NonNumericCoordinate {
                    crossing: record.code().to_string(),
                    field: field.name(),
                    value: value.to_string(),
                });
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(ValidationErrors(issues)))
    }
}

/// Empty, or a finite decimal number
pub fn is_coordinate(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.parse::<f64>().is_ok_and(f64::is_finite)
}
