//! CSV reading and writing for datasets and checkpoint files.
//!
//! Writes go to a sibling `.tmp` file that is renamed into place, so an
//! interrupted write never leaves a file under its final name.

use anyhow::{bail, Context, Result};
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{Dataset, Record, Schema};

/// Read a CSV file with a header row into a [`Dataset`].
/// Rows shorter than the header are padded with empty cells; longer rows
/// and repeated column names are errors, since neither can be written back.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open table {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?;
    let schema = Schema::new(headers.iter());
    if schema.len() != headers.len() {
        let mut seen = FxHashSet::default();
        let duplicate = headers.iter().find(|h| !seen.insert(*h)).unwrap_or_default();
        bail!("Duplicate column '{}' in header of {}", duplicate, path.display());
    }
    let width = schema.len();

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Bad row {} in {}", line + 2, path.display()))?;
        if row.len() > width {
            bail!(
                "Row {} in {} has {} fields, header has {}",
                line + 2,
                path.display(),
                row.len(),
                width
            );
        }
        records.push(Record::new(row.iter().map(str::to_string).collect()));
    }

    Ok(Dataset::new(schema, records))
}

/// Write `records` under `schema` as CSV, atomically.
pub fn write_table(path: &Path, schema: &Schema, records: &[Record]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Create directory {}", parent.display()))?;
        }
    }

    let tmp = tmp_path(path);
    {
        let mut writer = csv::WriterBuilder::new()
            .from_path(&tmp)
            .with_context(|| format!("Create {}", tmp.display()))?;
        writer.write_record(schema.names())?;
        let width = schema.len();
        for record in records {
            let values = record.values();
            if values.len() > width {
                bail!("Record has {} fields, header has {}", values.len(), width);
            }
            writer.write_record((0..width).map(|i| values.get(i).map(String::as_str).unwrap_or("")))?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Write a whole dataset, atomically.
pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    write_table(path, &dataset.schema, &dataset.records)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
