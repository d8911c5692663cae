//! Directory-backed document store
//!
//! A document is a directory holding one `<region>.json` file per region.
//! Regions are ordered by file name. Hidden files are ignored, which keeps
//! the apply history file out of the region list.

use super::{
    DocumentStore, GridVisibility, MemoryStore, Placement, RegionDoc, RegionId, StoreError,
    TableRef,
};
use crate::error::{Error, Result};
use crate::record::{FieldSet, InstanceRef};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A document loaded from a directory of region files
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Region file paths, indexed like the inner store's regions
    files: Vec<PathBuf>,
    inner: MemoryStore,
}

impl FileStore {
    /// Load every region file under `root`
    pub fn open<P: AsRef<Path>>(root: P, marker_kind: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if entry.file_type().is_file()
                && !hidden
                && path.extension().is_some_and(|ext| ext == "json")
            {
                files.push(path.to_path_buf());
            }
        }

        let mut regions = Vec::with_capacity(files.len());
        for path in &files {
            let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
                path: path.clone(),
                source: e,
            })?;
            let mut doc: RegionDoc = serde_json::from_str(&content)?;
            if doc.name.is_empty() {
                doc.name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
            regions.push(doc);
        }

        tracing::debug!("loaded {} region file(s) from {}", files.len(), root.display());

        Ok(Self {
            root,
            files,
            inner: MemoryStore::from_regions(regions).with_marker_kind(marker_kind),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Borrow the in-memory view of the document
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Write every region back to its file.
    ///
    /// Each region is first written to a hidden `.<file>.tmp` beside its
    /// target; targets are replaced only once every region is staged.
    pub fn save(&self) -> Result<()> {
        let mut staged = Vec::with_capacity(self.files.len());
        for (doc, path) in self.inner.to_regions().iter().zip(&self.files) {
            let temp = staging_path(path);
            if let Err(e) = write_region_file(&temp, doc) {
                discard(staged.iter().map(|(temp, _)| temp));
                return Err(e);
            }
            staged.push((temp, path));
        }

        for (done, (temp, path)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(temp, path) {
                discard(staged[done..].iter().map(|(temp, _)| temp));
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_region_file(path: &Path, doc: &RegionDoc) -> Result<()> {
    let content = serde_json::to_string_pretty(doc)?;
    fs::write(path, content)?;
    Ok(())
}

fn discard<'a>(temps: impl Iterator<Item = &'a PathBuf>) {
    for temp in temps {
        if let Err(e) = fs::remove_file(temp) {
            tracing::warn!("could not remove {}: {}", temp.display(), e);
        }
    }
}

impl DocumentStore for FileStore {
    fn regions(&self) -> std::result::Result<Vec<RegionId>, StoreError> {
        self.inner.regions()
    }

    fn region_name(&self, region: RegionId) -> std::result::Result<String, StoreError> {
        self.inner.region_name(region)
    }

    fn entities(&self, region: RegionId) -> std::result::Result<Vec<InstanceRef>, StoreError> {
        self.inner.entities(region)
    }

    fn is_crossing_marker(&self, entity: InstanceRef) -> bool {
        self.inner.is_crossing_marker(entity)
    }

    fn read_fields(
        &self,
        entity: InstanceRef,
    ) -> std::result::Result<Option<FieldSet>, StoreError> {
        self.inner.read_fields(entity)
    }

    fn write_fields(
        &mut self,
        entity: InstanceRef,
        fields: &FieldSet,
    ) -> std::result::Result<(), StoreError> {
        self.inner.write_fields(entity, fields)
    }

    fn create_entity(
        &mut self,
        placement: &Placement,
        fields: &FieldSet,
    ) -> std::result::Result<InstanceRef, StoreError> {
        self.inner.create_entity(placement, fields)
    }

    fn delete_entity(&mut self, entity: InstanceRef) -> std::result::Result<(), StoreError> {
        self.inner.delete_entity(entity)
    }

    fn tables(&self, region: RegionId) -> std::result::Result<Vec<TableRef>, StoreError> {
        self.inner.tables(region)
    }

    fn row_count(&self, table: TableRef) -> std::result::Result<usize, StoreError> {
        self.inner.row_count(table)
    }

    fn column_count(&self, table: TableRef) -> std::result::Result<usize, StoreError> {
        self.inner.column_count(table)
    }

    fn read_cell(
        &self,
        table: TableRef,
        row: usize,
        col: usize,
    ) -> std::result::Result<String, StoreError> {
        self.inner.read_cell(table, row, col)
    }

    fn write_cell(
        &mut self,
        table: TableRef,
        row: usize,
        col: usize,
        text: &str,
    ) -> std::result::Result<(), StoreError> {
        self.inner.write_cell(table, row, col, text)
    }

    fn insert_table(
        &mut self,
        placement: &Placement,
        cells: Vec<Vec<String>>,
    ) -> std::result::Result<TableRef, StoreError> {
        self.inner.insert_table(placement, cells)
    }

    fn begin_transaction(&mut self) -> std::result::Result<(), StoreError> {
        self.inner.begin_transaction()
    }

    /// Persist every region file, then commit in memory. A failed save
    /// rolls the transaction back.
    fn commit(&mut self) -> std::result::Result<(), StoreError> {
        if !self.inner.in_transaction() {
            return self.inner.commit();
        }

        if let Err(e) = self.save() {
            if let Err(rollback_err) = self.inner.rollback() {
                tracing::error!("rollback after failed save: {}", rollback_err);
            }
            return Err(StoreError::Io(e.to_string()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> std::result::Result<(), StoreError> {
        self.inner.rollback()
    }

    fn grid_visibility(&mut self) -> Option<&mut dyn GridVisibility> {
        Some(&mut self.inner)
    }
}
