//! Merge checkpoints into the final dataset.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointOrder, ProgressStore};
use crate::models::{Dataset, Record, Schema};
use crate::table::{read_dataset, write_dataset};

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub files: usize,
    pub rows: usize,
    pub output: PathBuf,
}

/// Concatenate every checkpoint in `store` into `output`.
///
/// Checkpoints are read in parallel but concatenated in `order`. Columns are
/// the union of all checkpoint headers in first-seen order; cells a file
/// lacks are left empty. With no checkpoints nothing is written.
pub fn merge_checkpoints(store: &ProgressStore, order: CheckpointOrder, output: &Path) -> Result<MergeReport> {
    let files = store.checkpoint_files(order)?;
    if files.is_empty() {
        warn!("No checkpoints in {}, nothing to merge", store.dir().display());
        return Ok(MergeReport {
            files: 0,
            rows: 0,
            output: output.to_path_buf(),
        });
    }

    info!("Merging {} checkpoints from {}", files.len(), store.dir().display());
    let tables: Vec<Dataset> = files
        .par_iter()
        .map(|(index, path)| {
            read_dataset(path).with_context(|| format!("Failed to read checkpoint for batch {}", index))
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = concat(tables);
    write_dataset(output, &merged)?;
    info!("Merged {} rows → {}", merged.len(), output.display());

    Ok(MergeReport {
        files: files.len(),
        rows: merged.len(),
        output: output.to_path_buf(),
    })
}

/// Stack tables vertically over the union of their columns.
pub fn concat(tables: Vec<Dataset>) -> Dataset {
    let mut schema = Schema::default();
    for table in &tables {
        for name in table.schema.names() {
            schema.push(name.clone());
        }
    }

    let total: usize = tables.iter().map(Dataset::len).sum();
    let mut records = Vec::with_capacity(total);
    for table in tables {
        if table.schema.names() == schema.names() {
            records.extend(table.records);
            continue;
        }
        let mapping: Vec<Option<usize>> = table.schema.names().iter().map(|n| schema.position(n)).collect();
        for record in table.records {
            let mut values = vec![String::new(); schema.len()];
            for (src, dst) in mapping.iter().enumerate() {
                if let Some(dst) = dst {
                    values[*dst] = record.value(src).to_string();
                }
            }
            records.push(Record::new(values));
        }
    }

    Dataset::new(schema, records)
}
