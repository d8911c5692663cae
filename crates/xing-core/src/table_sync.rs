//! Keeping document tables consistent with canonical records
//!
//! A table is recognized by its heading row: the first row holding one of
//! the configured heading phrases (e.g. "XING"). Columns are mapped to fields
//! by their heading text, and data rows start right below the heading row.
//! Rows are matched to records by their crossing code.

use crate::error::{Result, Stage, StageExt};
use crate::identity::crossing_key;
use crate::record::{CrossingRecord, Field};
use crate::store::{in_transaction, DocumentStore, Placement, StoreError, TableRef};
use std::collections::HashMap;

/// Heading phrases marking the crossing column of a table
pub const DEFAULT_HEADINGS: &[&str] = &["XING", "CROSSING", "ID"];

/// Columns of a newly created summary/page table
pub const SUMMARY_COLUMNS: [Field; 5] = [
    Field::Crossing,
    Field::Owner,
    Field::Description,
    Field::Location,
    Field::DwgRef,
];

/// Columns of a newly created lat/long table
pub const LAT_LONG_COLUMNS: [Field; 4] = [
    Field::Crossing,
    Field::Description,
    Field::Lat,
    Field::Long,
];

/// Classification of a tabular element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Summary,
    LatLong,
    Unknown,
}

/// Structure of a recognized table
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableLayout {
    kind: TableKind,
    data_start: usize,
    code_col: usize,
    /// Every column mapped to a field, including the code column
    columns: Vec<(usize, Field)>,
}

/// Counts from one synchronization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables_synced: usize,
    pub unknown_tables: usize,
    pub rows_matched: usize,
    pub cells_written: usize,
}

/// Matches table rows to records by crossing code.
///
/// Rows carry the code the crossing had when the table was last written. A
/// record whose canonical instance still holds an older code (after
/// renumbering) is found under that stored code first, so its row follows it
/// to the new code instead of being orphaned.
#[derive(Debug, Default)]
pub struct RowIndex<'a> {
    by_stored: HashMap<String, &'a CrossingRecord>,
    by_current: HashMap<String, &'a CrossingRecord>,
}

impl<'a> RowIndex<'a> {
    /// Index records by the codes currently stored in the document
    pub fn build<S: DocumentStore + ?Sized>(store: &S, records: &'a [CrossingRecord]) -> Self {
        let mut index = Self::default();
        for record in records {
            let stored = record
                .canonical_instance
                .and_then(|instance| store.read_fields(instance).ok().flatten());

            // Renamed records claim the rows still showing their old code
            match stored.map(|fields| crossing_key(&fields.crossing)) {
                Some(key) if !key.is_empty() && key != record.key() => {
                    index.by_stored.insert(key, record);
                }
                _ => {
                    index.by_current.insert(record.key(), record);
                }
            }
        }
        index
    }

    /// Index records by their current codes only
    pub fn current(records: &'a [CrossingRecord]) -> Self {
        Self {
            by_stored: HashMap::new(),
            by_current: records.iter().map(|r| (r.key(), r)).collect(),
        }
    }

    pub fn lookup(&self, code: &str) -> Option<&'a CrossingRecord> {
        let key = crossing_key(code);
        self.by_stored
            .get(&key)
            .or_else(|| self.by_current.get(&key))
            .copied()
    }
}

/// Table classification, row lookup, diff update and creation
#[derive(Debug, Clone)]
pub struct TableSync {
    headings: Vec<String>,
}

impl Default for TableSync {
    fn default() -> Self {
        Self::new(DEFAULT_HEADINGS.iter().map(|h| h.to_string()).collect())
    }
}

impl TableSync {
    /// `headings` must not be empty; the first one labels created tables
    pub fn new(headings: Vec<String>) -> Self {
        let headings = if headings.is_empty() {
            DEFAULT_HEADINGS.iter().map(|h| h.to_string()).collect()
        } else {
            headings
        };
        Self { headings }
    }

    fn is_heading(&self, text: &str) -> bool {
        let text = text.trim();
        self.headings.iter().any(|h| h.trim().eq_ignore_ascii_case(text))
    }

    /// Locate the heading row: (row, column of the heading phrase)
    fn heading_cell<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        table: TableRef,
    ) -> std::result::Result<Option<(usize, usize)>, StoreError> {
        let rows = store.row_count(table)?;
        let cols = store.column_count(table)?;
        for row in 0..rows {
            for col in 0..cols {
                if self.is_heading(&store.read_cell(table, row, col)?) {
                    return Ok(Some((row, col)));
                }
            }
        }
        Ok(None)
    }

    fn layout<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        table: TableRef,
    ) -> std::result::Result<Option<TableLayout>, StoreError> {
        let Some((heading_row, code_col)) = self.heading_cell(store, table)? else {
            return Ok(None);
        };

        let mut columns = vec![(code_col, Field::Crossing)];
        for col in 0..store.column_count(table)? {
            if col == code_col {
                continue;
            }
            let text = store.read_cell(table, heading_row, col)?;
            match Field::from_heading(&text) {
                Some(Field::Crossing) | None => {}
                Some(field) => columns.push((col, field)),
            }
        }

        let has = |field: Field| columns.iter().any(|(_, f)| *f == field);
        let kind = if has(Field::Lat) && has(Field::Long) {
            TableKind::LatLong
        } else if has(Field::Owner) && has(Field::Description) {
            TableKind::Summary
        } else {
            TableKind::Unknown
        };

        Ok(Some(TableLayout {
            kind,
            data_start: heading_row + 1,
            code_col,
            columns,
        }))
    }

    /// Classify a table by its heading row
    pub fn identify<S: DocumentStore + ?Sized>(&self, store: &S, table: TableRef) -> TableKind {
        match self.layout(store, table) {
            Ok(Some(layout)) => layout.kind,
            Ok(None) => TableKind::Unknown,
            Err(e) => {
                tracing::warn!("could not classify {}: {}", table, e);
                TableKind::Unknown
            }
        }
    }

    /// First data row below the heading; 0 when no heading is found
    pub fn find_data_start_row<S: DocumentStore + ?Sized>(&self, store: &S, table: TableRef) -> usize {
        match self.heading_cell(store, table) {
            Ok(Some((row, _))) => row + 1,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("could not read heading of {}: {}", table, e);
                0
            }
        }
    }

    /// Bring every recognized table in line with `records`
    pub fn update_all_tables<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        records: &[CrossingRecord],
    ) -> Result<SyncReport> {
        let index = RowIndex::build(&*store, records);
        self.sync_tables(store, &index)
    }

    /// Update every recognized table using a prepared row index
    pub fn sync_tables<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        index: &RowIndex<'_>,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for region in store.regions().at(Stage::Sync)? {
            for table in store.tables(region).at(Stage::Sync)? {
                self.sync_table(store, table, index, &mut report)
                    .at(Stage::Sync)?;
            }
        }

        tracing::debug!(
            "synced {} table(s): {} row(s) matched, {} cell(s) written",
            report.tables_synced,
            report.rows_matched,
            report.cells_written
        );
        Ok(report)
    }

    fn sync_table<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        table: TableRef,
        index: &RowIndex<'_>,
        report: &mut SyncReport,
    ) -> std::result::Result<(), StoreError> {
        let layout = match self.layout(store, table)? {
            Some(layout) if layout.kind != TableKind::Unknown => layout,
            _ => {
                report.unknown_tables += 1;
                return Ok(());
            }
        };

        for row in layout.data_start..store.row_count(table)? {
            let code = store.read_cell(table, row, layout.code_col)?;
            if code.trim().is_empty() {
                continue;
            }
            let Some(record) = index.lookup(&code) else {
                continue;
            };
            report.rows_matched += 1;

            for &(col, field) in &layout.columns {
                let target = record.fields.get(field);
                if store.read_cell(table, row, col)? != target {
                    store.write_cell(table, row, col, target)?;
                    report.cells_written += 1;
                }
            }
        }

        report.tables_synced += 1;
        Ok(())
    }

    /// Build a summary table for `records`, optionally limited to one
    /// drawing reference, and insert it at `placement`
    pub fn create_and_insert_page_table<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        records: &[CrossingRecord],
        dwg_ref: Option<&str>,
        placement: &Placement,
    ) -> Result<TableRef> {
        let rows: Vec<&CrossingRecord> = records
            .iter()
            .filter(|r| {
                dwg_ref.map_or(true, |wanted| r.fields.dwg_ref.trim().eq_ignore_ascii_case(wanted.trim()))
            })
            .collect();

        let cells = self.build_cells(&SUMMARY_COLUMNS, &rows);
        self.insert(store, cells, placement)
    }

    /// Build a lat/long table for every record with a coordinate and insert
    /// it at `placement`
    pub fn create_and_insert_lat_long_table<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        records: &[CrossingRecord],
        placement: &Placement,
    ) -> Result<TableRef> {
        let rows: Vec<&CrossingRecord> = records
            .iter()
            .filter(|r| !r.fields.lat.trim().is_empty() || !r.fields.long.trim().is_empty())
            .collect();

        let cells = self.build_cells(&LAT_LONG_COLUMNS, &rows);
        self.insert(store, cells, placement)
    }

    fn build_cells(&self, columns: &[Field], rows: &[&CrossingRecord]) -> Vec<Vec<String>> {
        let header = columns
            .iter()
            .map(|field| match field {
                Field::Crossing => self.headings[0].clone(),
                Field::DwgRef => "DWG REF".to_string(),
                Field::Lat => "LATITUDE".to_string(),
                Field::Long => "LONGITUDE".to_string(),
                other => other.name().to_string(),
            })
            .collect();

        std::iter::once(header)
            .chain(rows.iter().map(|record| {
                columns
                    .iter()
                    .map(|&field| record.fields.get(field).to_string())
                    .collect()
            }))
            .collect()
    }

    fn insert<S: DocumentStore + ?Sized>(
        &self,
        store: &mut S,
        cells: Vec<Vec<String>>,
        placement: &Placement,
    ) -> Result<TableRef> {
        let rows = cells.len() - 1;
        let table = in_transaction(store, Stage::CreateTable, |store| {
            let table = store
                .insert_table(placement, cells)
                .at(Stage::CreateTable)?;
            if let Some(grid) = store.grid_visibility() {
                grid.set_grid_visible(table, true).at(Stage::CreateTable)?;
            }
            Ok(table)
        })?;

        tracing::info!("inserted {} with {} data row(s)", table, rows);
        Ok(table)
    }
}
