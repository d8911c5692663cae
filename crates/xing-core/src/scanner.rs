//! Instance scanner: discovers every crossing marker in a document

use crate::error::{Result, Stage, StageExt};
use crate::identity::crossing_key;
use crate::record::{CrossingRecord, InstanceContext, InstanceRef};
use crate::resolver::group_instances;
use crate::store::{DocumentStore, RegionId};
use indexmap::IndexMap;

/// Result of scanning a document
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Grouped crossings, in first-discovery order
    pub records: Vec<CrossingRecord>,
    /// Every instance found, in discovery order
    pub contexts: IndexMap<InstanceRef, InstanceContext>,
    /// Number of regions walked
    pub regions_scanned: usize,
    /// Markers skipped because they could not be read
    pub skipped: usize,
}

impl ScanResult {
    /// Find a record by crossing code (case-insensitive)
    pub fn find_record(&self, code: &str) -> Option<&CrossingRecord> {
        let key = crossing_key(code);
        self.records.iter().find(|r| r.key() == key)
    }

    pub fn instance_count(&self) -> usize {
        self.contexts.len()
    }
}

/// Scan every region of `store` for crossing markers and group them.
///
/// Unreadable markers and regions are skipped with a warning. Only a failure
/// to enumerate the regions themselves is fatal.
pub fn scan<S: DocumentStore + ?Sized>(store: &S) -> Result<ScanResult> {
    let regions = store.regions().at(Stage::Scan)?;
    let mut contexts: IndexMap<InstanceRef, InstanceContext> = IndexMap::new();
    let mut skipped = 0;

    for &region in &regions {
        let (found, region_skipped) = scan_region(store, region);
        skipped += region_skipped;
        for context in found {
            contexts.insert(context.instance, context);
        }
    }

    let records = group_instances(contexts.values());

    tracing::info!(
        "scanned {} region(s): {} instance(s) in {} crossing(s), {} skipped",
        regions.len(),
        contexts.len(),
        records.len(),
        skipped
    );

    Ok(ScanResult {
        records,
        contexts,
        regions_scanned: regions.len(),
        skipped,
    })
}

fn scan_region<S: DocumentStore + ?Sized>(
    store: &S,
    region: RegionId,
) -> (Vec<InstanceContext>, usize) {
    let space_name = match store.region_name(region) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!("skipping region {:?}: {}", region, e);
            return (Vec::new(), 0);
        }
    };

    let entities = match store.entities(region) {
        Ok(entities) => entities,
        Err(e) => {
            tracing::warn!("skipping region '{}': {}", space_name, e);
            return (Vec::new(), 0);
        }
    };

    let mut found = Vec::new();
    let mut skipped = 0;

    for entity in entities {
        if !store.is_crossing_marker(entity) {
            continue;
        }

        match store.read_fields(entity) {
            Ok(Some(mut fields)) if !fields.crossing.trim().is_empty() => {
                fields.crossing = fields.crossing.trim().to_string();
                found.push(InstanceContext {
                    instance: entity,
                    space_name: space_name.clone(),
                    fields,
                });
            }
            Ok(_) => {
                tracing::warn!("skipping marker {} in '{}': no crossing code", entity, space_name);
                skipped += 1;
            }
            Err(e) => {
                tracing::warn!("skipping marker {} in '{}': {}", entity, space_name, e);
                skipped += 1;
            }
        }
    }

    tracing::debug!("region '{}': {} marker(s)", space_name, found.len());
    (found, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldSet, GroupState};
    use crate::store::{EntityDoc, MemoryStore};

    fn fields(code: &str, owner: &str) -> FieldSet {
        FieldSet {
            owner: owner.to_string(),
            ..FieldSet::with_code(code)
        }
    }

    #[test]
    fn test_scan_empty_store() {
        let store = MemoryStore::new();
        let result = scan(&store).unwrap();

        assert!(result.records.is_empty());
        assert!(result.contexts.is_empty());
        assert_eq!(result.regions_scanned, 0);
    }

    #[test]
    fn test_scan_groups_across_regions_in_discovery_order() {
        let mut store = MemoryStore::new();
        let a = store.add_region("Sheet A");
        let b = store.add_region("Sheet B");
        let x2 = store.add_marker(a, fields("X2", "Co A"));
        let x1_a = store.add_marker(a, fields("X1", "Co A"));
        let x1_b = store.add_marker(b, fields("x1 ", "Co A"));

        let result = scan(&store).unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].code(), "X2");
        assert_eq!(result.records[0].all_instances, vec![x2]);
        assert_eq!(result.records[1].code(), "X1");
        assert_eq!(result.records[1].all_instances, vec![x1_a, x1_b]);
        assert_eq!(result.records[1].state, GroupState::Unanimous);
        assert_eq!(result.contexts[&x1_b].space_name, "Sheet B");
        assert_eq!(result.contexts[&x1_b].fields.crossing, "x1");
    }

    #[test]
    fn test_scan_skips_unreadable_and_foreign_entities() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet");
        store.add_marker(sheet, fields("X1", "Co A"));
        store.add_entity(
            sheet,
            EntityDoc {
                kind: "XING".to_string(),
                fields: None,
                ..EntityDoc::default()
            },
        );
        store.add_marker(sheet, fields("   ", "Co B"));
        store.add_entity(
            sheet,
            EntityDoc {
                kind: "LINE".to_string(),
                fields: Some(fields("X5", "")),
                ..EntityDoc::default()
            },
        );

        let result = scan(&store).unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.instance_count(), 1);
        assert_eq!(result.skipped, 2);
        assert!(result.find_record("x1").is_some());
        assert!(result.find_record("X5").is_none());
    }

    #[test]
    fn test_scan_detects_conflicts() {
        let mut store = MemoryStore::new();
        let a = store.add_region("A");
        let b = store.add_region("B");
        store.add_marker(a, fields("X1", "Co A"));
        store.add_marker(b, fields("X1", "Co B"));

        let result = scan(&store).unwrap();
        assert_eq!(result.records[0].state, GroupState::Conflicted);
        assert_eq!(result.records[0].fields.owner, "Co A");
    }
}
