//! In-process document store

use super::{DocumentStore, GridVisibility, Placement, RegionId, StoreError, TableRef};
use crate::record::{FieldSet, InstanceRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker kind recognized as a crossing when none is configured
pub const DEFAULT_MARKER_KIND: &str = "XING";

/// Serialized form of one region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionDoc {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityDoc>,
    #[serde(default)]
    pub tables: Vec<TableDoc>,
}

/// Serialized form of one placed entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDoc {
    /// Block/type name; crossing markers carry the configured marker kind
    pub kind: String,
    #[serde(default)]
    pub position: [f64; 2],
    /// Attribute values, absent for malformed entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldSet>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Serialized form of one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDoc {
    #[serde(default)]
    pub position: [f64; 2],
    pub cells: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub grid_visible: bool,
}

impl TableDoc {
    fn column_count(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Number of mutating calls issued against a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub field_writes: usize,
    pub cell_writes: usize,
    pub entities_created: usize,
    pub entities_deleted: usize,
    pub tables_inserted: usize,
}

#[derive(Debug, Clone, Default)]
struct Region {
    name: String,
    entities: Vec<InstanceRef>,
    tables: Vec<TableRef>,
}

#[derive(Debug, Clone, Default)]
struct State {
    regions: Vec<Region>,
    entities: BTreeMap<InstanceRef, EntityDoc>,
    tables: BTreeMap<TableRef, TableDoc>,
    next_id: u64,
}

impl State {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn region_mut(&mut self, region: RegionId) -> Result<&mut Region, StoreError> {
        self.regions
            .get_mut(region.0 as usize)
            .ok_or(StoreError::UnknownRegion(region))
    }
}

/// A document held entirely in memory
///
/// Handles are issued from a single counter, so entity and table ids never
/// repeat within one store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: State,
    snapshot: Option<State>,
    marker_kind: String,
    grid_capable: bool,
    counts: WriteCounts,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store recognizing the default marker kind
    pub fn new() -> Self {
        Self {
            state: State::default(),
            snapshot: None,
            marker_kind: DEFAULT_MARKER_KIND.to_string(),
            grid_capable: false,
            counts: WriteCounts::default(),
        }
    }

    /// Build a store from serialized regions, in the given order
    pub fn from_regions(regions: Vec<RegionDoc>) -> Self {
        let mut store = Self::new();
        for doc in regions {
            let region = store.add_region(doc.name);
            for entity in doc.entities {
                store.add_entity(region, entity);
            }
            for table in doc.tables {
                store.add_table_doc(region, table);
            }
        }
        store
    }

    /// Serialize the current state back into regions
    pub fn to_regions(&self) -> Vec<RegionDoc> {
        self.state
            .regions
            .iter()
            .map(|region| RegionDoc {
                name: region.name.clone(),
                entities: region
                    .entities
                    .iter()
                    .filter_map(|id| self.state.entities.get(id).cloned())
                    .collect(),
                tables: region
                    .tables
                    .iter()
                    .filter_map(|id| self.state.tables.get(id).cloned())
                    .collect(),
            })
            .collect()
    }

    pub fn with_marker_kind(mut self, kind: impl Into<String>) -> Self {
        self.marker_kind = kind.into();
        self
    }

    /// Advertise the optional grid-visibility capability
    pub fn with_grid_capability(mut self) -> Self {
        self.grid_capable = true;
        self
    }

    pub fn marker_kind(&self) -> &str {
        &self.marker_kind
    }

    pub fn add_region(&mut self, name: impl Into<String>) -> RegionId {
        self.state.regions.push(Region {
            name: name.into(),
            ..Region::default()
        });
        RegionId((self.state.regions.len() - 1) as u32)
    }

    /// Add an entity without counting it as a write
    ///
    /// # Panics
    /// Panics if `region` was not issued by this store.
    pub fn add_entity(&mut self, region: RegionId, entity: EntityDoc) -> InstanceRef {
        let id = InstanceRef(self.state.issue_id());
        self.state.regions[region.0 as usize].entities.push(id);
        self.state.entities.insert(id, entity);
        id
    }

    /// Add a crossing marker carrying `fields`
    pub fn add_marker(&mut self, region: RegionId, fields: FieldSet) -> InstanceRef {
        let kind = self.marker_kind.clone();
        self.add_entity(
            region,
            EntityDoc {
                kind,
                fields: Some(fields),
                ..EntityDoc::default()
            },
        )
    }

    /// Add a table without counting it as a write
    pub fn add_table(&mut self, region: RegionId, cells: Vec<Vec<String>>) -> TableRef {
        self.add_table_doc(
            region,
            TableDoc {
                cells,
                ..TableDoc::default()
            },
        )
    }

    fn add_table_doc(&mut self, region: RegionId, table: TableDoc) -> TableRef {
        let id = TableRef(self.state.issue_id());
        self.state.regions[region.0 as usize].tables.push(id);
        self.state.tables.insert(id, table);
        id
    }

    /// Current attribute values of an entity
    pub fn fields_of(&self, entity: InstanceRef) -> Option<&FieldSet> {
        self.state.entities.get(&entity).and_then(|e| e.fields.as_ref())
    }

    pub fn contains_entity(&self, entity: InstanceRef) -> bool {
        self.state.entities.contains_key(&entity)
    }

    /// Current cell grid of a table
    pub fn cells_of(&self, table: TableRef) -> Option<&[Vec<String>]> {
        self.state.tables.get(&table).map(|t| t.cells.as_slice())
    }

    pub fn grid_visible(&self, table: TableRef) -> bool {
        self.state.tables.get(&table).is_some_and(|t| t.grid_visible)
    }

    pub fn counts(&self) -> WriteCounts {
        self.counts
    }

    pub fn reset_counts(&mut self) {
        self.counts = WriteCounts::default();
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn entity(&self, entity: InstanceRef) -> Result<&EntityDoc, StoreError> {
        self.state
            .entities
            .get(&entity)
            .ok_or(StoreError::UnknownEntity(entity))
    }

    fn table(&self, table: TableRef) -> Result<&TableDoc, StoreError> {
        self.state
            .tables
            .get(&table)
            .ok_or(StoreError::UnknownTable(table))
    }
}

impl DocumentStore for MemoryStore {
    fn regions(&self) -> Result<Vec<RegionId>, StoreError> {
        Ok((0..self.state.regions.len() as u32).map(RegionId).collect())
    }

    fn region_name(&self, region: RegionId) -> Result<String, StoreError> {
        self.state
            .regions
            .get(region.0 as usize)
            .map(|r| r.name.clone())
            .ok_or(StoreError::UnknownRegion(region))
    }

    fn entities(&self, region: RegionId) -> Result<Vec<InstanceRef>, StoreError> {
        self.state
            .regions
            .get(region.0 as usize)
            .map(|r| r.entities.clone())
            .ok_or(StoreError::UnknownRegion(region))
    }

    fn is_crossing_marker(&self, entity: InstanceRef) -> bool {
        self.state
            .entities
            .get(&entity)
            .is_some_and(|e| e.kind.eq_ignore_ascii_case(&self.marker_kind))
    }

    fn read_fields(&self, entity: InstanceRef) -> Result<Option<FieldSet>, StoreError> {
        Ok(self.entity(entity)?.fields.clone())
    }

    fn write_fields(&mut self, entity: InstanceRef, fields: &FieldSet) -> Result<(), StoreError> {
        let doc = self
            .state
            .entities
            .get_mut(&entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        if doc.read_only {
            return Err(StoreError::ReadOnly(entity));
        }
        doc.fields = Some(fields.clone());
        self.counts.field_writes += 1;
        Ok(())
    }

    fn create_entity(
        &mut self,
        placement: &Placement,
        fields: &FieldSet,
    ) -> Result<InstanceRef, StoreError> {
        self.state.region_mut(placement.region)?;
        let id = InstanceRef(self.state.issue_id());
        self.state.region_mut(placement.region)?.entities.push(id);
        self.state.entities.insert(
            id,
            EntityDoc {
                kind: self.marker_kind.clone(),
                position: placement.position,
                fields: Some(fields.clone()),
                read_only: false,
            },
        );
        self.counts.entities_created += 1;
        Ok(id)
    }

    fn delete_entity(&mut self, entity: InstanceRef) -> Result<(), StoreError> {
        if self.state.entities.remove(&entity).is_none() {
            return Err(StoreError::UnknownEntity(entity));
        }
        for region in &mut self.state.regions {
            region.entities.retain(|id| *id != entity);
        }
        self.counts.entities_deleted += 1;
        Ok(())
    }

    fn tables(&self, region: RegionId) -> Result<Vec<TableRef>, StoreError> {
        self.state
            .regions
            .get(region.0 as usize)
            .map(|r| r.tables.clone())
            .ok_or(StoreError::UnknownRegion(region))
    }

    fn row_count(&self, table: TableRef) -> Result<usize, StoreError> {
        Ok(self.table(table)?.cells.len())
    }

    fn column_count(&self, table: TableRef) -> Result<usize, StoreError> {
        Ok(self.table(table)?.column_count())
    }

    fn read_cell(&self, table: TableRef, row: usize, col: usize) -> Result<String, StoreError> {
        let doc = self.table(table)?;
        if row >= doc.cells.len() || col >= doc.column_count() {
            return Err(StoreError::CellOutOfRange { table, row, col });
        }
        // Short rows read as blank cells
        Ok(doc.cells[row].get(col).cloned().unwrap_or_default())
    }

    fn write_cell(
        &mut self,
        table: TableRef,
        row: usize,
        col: usize,
        text: &str,
    ) -> Result<(), StoreError> {
        let doc = self
            .state
            .tables
            .get_mut(&table)
            .ok_or(StoreError::UnknownTable(table))?;
        if row >= doc.cells.len() || col >= doc.column_count() {
            return Err(StoreError::CellOutOfRange { table, row, col });
        }
        let cells = &mut doc.cells[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = text.to_string();
        self.counts.cell_writes += 1;
        Ok(())
    }

    fn insert_table(
        &mut self,
        placement: &Placement,
        cells: Vec<Vec<String>>,
    ) -> Result<TableRef, StoreError> {
        self.state.region_mut(placement.region)?;
        let id = self.add_table_doc(
            placement.region,
            TableDoc {
                position: placement.position,
                cells,
                grid_visible: false,
            },
        );
        self.counts.tables_inserted += 1;
        Ok(id)
    }

    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no open transaction to commit".to_string()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or_else(|| {
            StoreError::Transaction("no open transaction to roll back".to_string())
        })?;
        self.state = snapshot;
        Ok(())
    }

    fn grid_visibility(&mut self) -> Option<&mut dyn GridVisibility> {
        if self.grid_capable {
            Some(self)
        } else {
            None
        }
    }
}

impl GridVisibility for MemoryStore {
    fn set_grid_visible(&mut self, table: TableRef, visible: bool) -> Result<(), StoreError> {
        let doc = self
            .state
            .tables
            .get_mut(&table)
            .ok_or(StoreError::UnknownTable(table))?;
        doc.grid_visible = visible;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_marker_recognition_is_case_insensitive() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet1");
        let marker = store.add_marker(sheet, FieldSet::with_code("X1"));
        let other = store.add_entity(
            sheet,
            EntityDoc {
                kind: "xing".to_string(),
                ..EntityDoc::default()
            },
        );
        let line = store.add_entity(
            sheet,
            EntityDoc {
                kind: "LINE".to_string(),
                ..EntityDoc::default()
            },
        );

        assert!(store.is_crossing_marker(marker));
        assert!(store.is_crossing_marker(other));
        assert!(!store.is_crossing_marker(line));
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet1");
        let marker = store.add_marker(sheet, FieldSet::with_code("X1"));

        store.begin_transaction().unwrap();
        store.write_fields(marker, &FieldSet::with_code("X2")).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.fields_of(marker).unwrap().crossing, "X1");
        assert!(!store.in_transaction());
        // Instrumentation counts issued writes, not surviving ones
        assert_eq!(store.counts().field_writes, 1);
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let mut store = MemoryStore::new();
        store.begin_transaction().unwrap();
        assert!(store.begin_transaction().is_err());
        store.commit().unwrap();
        assert!(store.commit().is_err());
    }

    #[test]
    fn test_short_rows_read_blank() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet1");
        let table = store.add_table(sheet, cells(&[&["XING", "OWNER"], &["X1"]]));

        assert_eq!(store.column_count(table).unwrap(), 2);
        assert_eq!(store.read_cell(table, 1, 1).unwrap(), "");
        store.write_cell(table, 1, 1, "Co A").unwrap();
        assert_eq!(store.read_cell(table, 1, 1).unwrap(), "Co A");
        assert!(store.read_cell(table, 2, 0).is_err());
    }

    #[test]
    fn test_read_only_entity_rejects_writes() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet1");
        let locked = store.add_entity(
            sheet,
            EntityDoc {
                kind: DEFAULT_MARKER_KIND.to_string(),
                fields: Some(FieldSet::with_code("X1")),
                read_only: true,
                ..EntityDoc::default()
            },
        );

        let err = store.write_fields(locked, &FieldSet::with_code("X1")).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly(_)));
    }

    #[test]
    fn test_grid_capability_is_optional() {
        let mut plain = MemoryStore::new();
        assert!(plain.grid_visibility().is_none());

        let mut capable = MemoryStore::new().with_grid_capability();
        let sheet = capable.add_region("Sheet1");
        let table = capable.add_table(sheet, cells(&[&["XING"]]));
        capable
            .grid_visibility()
            .unwrap()
            .set_grid_visible(table, true)
            .unwrap();
        assert!(capable.grid_visible(table));
    }

    #[test]
    fn test_regions_round_trip_through_docs() {
        let mut store = MemoryStore::new();
        let sheet = store.add_region("Sheet1");
        store.add_marker(sheet, FieldSet::with_code("X1"));
        store.add_table(sheet, cells(&[&["XING"], &["X1"]]));

        let docs = store.to_regions();
        let reloaded = MemoryStore::from_regions(docs);

        assert_eq!(reloaded.to_regions().len(), 1);
        assert_eq!(reloaded.to_regions()[0].entities.len(), 1);
        assert_eq!(reloaded.to_regions()[0].tables[0].cells[1][0], "X1");
    }
}
