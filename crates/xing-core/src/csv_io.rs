//! CSV interchange for crossing records

use crate::error::{Error, Result};
use crate::merge::ImportRow;
use crate::record::{CrossingRecord, Field};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Column order used when exporting
pub const EXPORT_COLUMNS: [Field; 7] = [
    Field::Crossing,
    Field::Owner,
    Field::Description,
    Field::Location,
    Field::DwgRef,
    Field::Lat,
    Field::Long,
];

/// Read import rows from a CSV file
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<ImportRow>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    read_from(BufReader::new(file), path.to_path_buf())
}

/// Read import rows from a string (useful for testing)
pub fn read_records_str(content: &str, source_name: &str) -> Result<Vec<ImportRow>> {
    read_from(content.as_bytes(), PathBuf::from(source_name))
}

fn read_from<R: Read>(reader: R, path: PathBuf) -> Result<Vec<ImportRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| Error::Csv {
        path: path.clone(),
        source: e,
    })?;

    // Column index -> field; unknown headings are ignored
    let columns: Vec<(usize, Field)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, name)| Field::from_heading(name).map(|f| (i, f)))
        .collect();

    if !columns.iter().any(|(_, f)| *f == Field::Crossing) {
        return Err(Error::CsvParse {
            path,
            message: "no crossing column found in CSV".to_string(),
        });
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| Error::Csv {
            path: path.clone(),
            source: e,
        })?;

        // Columns a short row does not reach are not carried
        let mut row = ImportRow::default();
        for &(index, field) in &columns {
            if let Some(value) = record.get(index) {
                row.set(field, value);
            }
        }
        rows.push(row);
    }

    tracing::debug!("read {} row(s) from {}", rows.len(), path.display());
    Ok(rows)
}

/// Write records to a CSV file
pub fn write_records<P: AsRef<Path>>(path: P, records: &[CrossingRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_to(file, records, path)
}

/// Write records as CSV into any writer
pub fn write_to<W: Write>(writer: W, records: &[CrossingRecord], path: &Path) -> Result<()> {
    let to_csv_error = |e: csv::Error| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(EXPORT_COLUMNS.iter().map(|f| f.name()))
        .map_err(to_csv_error)?;

    for record in records {
        csv_writer
            .write_record(EXPORT_COLUMNS.iter().map(|&f| record.fields.get(f)))
            .map_err(to_csv_error)?;
    }

    csv_writer.flush()?;
    Ok(())
}
