//! Document store boundary
//!
//! The host document owns every placed entity and table. The core only holds
//! opaque handles issued by the store and round-trips them back through this
//! trait. Two implementations ship with the crate:
//! - [`MemoryStore`]: an in-process arena of entities and tables
//! - [`FileStore`]: a directory with one JSON file per region, loaded into a
//!   `MemoryStore` and written back on commit

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{EntityDoc, MemoryStore, RegionDoc, TableDoc, WriteCounts, DEFAULT_MARKER_KIND};

use crate::error::{Stage, StageExt};
use crate::record::{FieldSet, InstanceRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Handle to a region (sheet, layout, space) of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Handle to a tabular element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef(pub u64);

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table #{}", self.0)
    }
}

/// Where to place a new entity or table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub region: RegionId,
    pub position: [f64; 2],
}

impl Placement {
    pub fn new(region: RegionId, x: f64, y: f64) -> Self {
        Self {
            region,
            position: [x, y],
        }
    }
}

/// Errors raised by a document store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown region {0:?}")]
    UnknownRegion(RegionId),

    #[error("unknown entity {0}")]
    UnknownEntity(InstanceRef),

    #[error("unknown {0}")]
    UnknownTable(TableRef),

    #[error("cell ({row}, {col}) is outside {table}")]
    CellOutOfRange { table: TableRef, row: usize, col: usize },

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("entity {0} is read-only")]
    ReadOnly(InstanceRef),

    #[error("document I/O failed: {0}")]
    Io(String),
}

/// Optional capability: toggling grid lines on a table
pub trait GridVisibility {
    fn set_grid_visible(&mut self, table: TableRef, visible: bool) -> Result<(), StoreError>;
}

/// Access to the host document
///
/// Enumeration order must be stable: regions in document order, entities in
/// region order. The scan's tie-break rule relies on it.
pub trait DocumentStore {
    fn regions(&self) -> Result<Vec<RegionId>, StoreError>;

    fn region_name(&self, region: RegionId) -> Result<String, StoreError>;

    fn entities(&self, region: RegionId) -> Result<Vec<InstanceRef>, StoreError>;

    /// Fixed type/tag test recognizing crossing markers
    fn is_crossing_marker(&self, entity: InstanceRef) -> bool;

    /// `Ok(None)` when the entity carries no readable attribute set
    fn read_fields(&self, entity: InstanceRef) -> Result<Option<FieldSet>, StoreError>;

    fn write_fields(&mut self, entity: InstanceRef, fields: &FieldSet) -> Result<(), StoreError>;

    fn create_entity(
        &mut self,
        placement: &Placement,
        fields: &FieldSet,
    ) -> Result<InstanceRef, StoreError>;

    fn delete_entity(&mut self, entity: InstanceRef) -> Result<(), StoreError>;

    fn tables(&self, region: RegionId) -> Result<Vec<TableRef>, StoreError>;

    fn row_count(&self, table: TableRef) -> Result<usize, StoreError>;

    fn column_count(&self, table: TableRef) -> Result<usize, StoreError>;

    fn read_cell(&self, table: TableRef, row: usize, col: usize) -> Result<String, StoreError>;

    fn write_cell(
        &mut self,
        table: TableRef,
        row: usize,
        col: usize,
        text: &str,
    ) -> Result<(), StoreError>;

    /// Insert a new table with the given cell grid
    fn insert_table(
        &mut self,
        placement: &Placement,
        cells: Vec<Vec<String>>,
    ) -> Result<TableRef, StoreError>;

    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Stores that can toggle table grid lines return the capability here
    fn grid_visibility(&mut self) -> Option<&mut dyn GridVisibility> {
        None
    }
}

/// Run `work` inside a store transaction, rolling back on failure
pub(crate) fn in_transaction<S, T, F>(store: &mut S, stage: Stage, work: F) -> crate::Result<T>
where
    S: DocumentStore + ?Sized,
    F: FnOnce(&mut S) -> crate::Result<T>,
{
    store.begin_transaction().at(stage)?;

    match work(store) {
        Ok(value) => {
            store.commit().at(stage)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!("rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
