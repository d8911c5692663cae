//! History of apply batches
//!
//! Each successful apply appends one entry, so the document directory keeps a
//! log of when crossings were written back and how much changed.

use crate::applier::ApplyReport;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// One successful apply batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyEntry {
    /// When the batch committed
    pub timestamp: DateTime<Utc>,
    /// Number of records in the batch
    pub records: usize,
    /// Instances whose fields were written
    pub instances_written: usize,
    /// Table cells rewritten
    pub cells_written: usize,
}

/// History file containing every recorded apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyHistory {
    pub entries: Vec<ApplyEntry>,
}

impl ApplyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the history at `path`. A missing file is an empty history.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(Error::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let history: Self = serde_json::from_reader(BufReader::new(file))?;
        tracing::debug!("loaded {} apply entries from {}", history.len(), path.display());
        Ok(history)
    }

    /// Write the whole history to `path`, replacing it
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn add_entry(&mut self, entry: ApplyEntry) {
        self.entries.push(entry);
    }

    pub fn last_entry(&self) -> Option<&ApplyEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Create a history entry from a committed apply
pub fn create_entry(report: &ApplyReport) -> ApplyEntry {
    ApplyEntry {
        timestamp: Utc::now(),
        records: report.records,
        instances_written: report.instances_written,
        cells_written: report.sync.cells_written,
    }
}
