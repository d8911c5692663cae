//! Crossing code assignment under insert, delete and sequential renumbering
//!
//! Only the numeric part of a code ever changes; each record keeps its own
//! prefix, and instance linkage is never touched.

use crate::identity::{IdentityKey, DEFAULT_PREFIX};
use crate::record::CrossingRecord;

/// Assigns and shifts crossing codes
#[derive(Debug, Clone)]
pub struct RenumberEngine {
    default_prefix: String,
}

impl Default for RenumberEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl RenumberEngine {
    pub fn new(default_prefix: impl Into<String>) -> Self {
        Self {
            default_prefix: default_prefix.into(),
        }
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Add `delta` to the number of every record at or after `start`,
    /// clamping at 1. Returns the number of codes that changed.
    pub fn shift(&self, records: &mut [CrossingRecord], start: usize, delta: i64) -> usize {
        let mut changed = 0;
        for record in records.iter_mut().skip(start) {
            let key = IdentityKey::parse(record.code());
            let number = (i64::from(key.number) + delta).clamp(1, i64::from(u32::MAX)) as u32;
            changed += rename(record, key.with_number(number).to_string());
        }
        tracing::debug!("shifted {} code(s) from index {} by {}", changed, start, delta);
        changed
    }

    /// Number every record by its 1-based position. Idempotent.
    pub fn renumber_sequential(&self, records: &mut [CrossingRecord]) -> usize {
        let mut changed = 0;
        for (index, record) in records.iter_mut().enumerate() {
            let key = IdentityKey::parse(record.code());
            changed += rename(record, key.with_number(index as u32 + 1).to_string());
        }
        changed
    }

    /// Code for a crossing appended after all existing ones
    pub fn next_name(&self, records: &[CrossingRecord]) -> String {
        let max = records
            .iter()
            .map(|r| IdentityKey::parse(r.code()).number)
            .max()
            .unwrap_or(0);
        format!("{}{}", self.default_prefix, max + 1)
    }

    /// Code for a crossing inserted at `index`
    pub fn name_at(&self, index: usize) -> String {
        format!("{}{}", self.default_prefix, index + 1)
    }
}

fn rename(record: &mut CrossingRecord, code: String) -> usize {
    if record.fields.crossing == code {
        0
    } else {
        record.fields.crossing = code;
        1
    }
}
