//! Core data models for the enrichment pipeline.
//!
//! This module contains the dataset representation, batch arithmetic, the
//! lookup query/result types and the run statistics shared by all stages.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::ops::Range;

// ============================================================================
// Dataset
// ============================================================================

/// Ordered column names with a name -> position index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl Schema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Schema::default();
        for name in names {
            schema.push(name.into());
        }
        schema
    }

    /// Append a column, returning its position. Existing names keep their slot.
    pub fn push(&mut self, name: String) -> usize {
        if let Some(&pos) = self.index.get(&name) {
            return pos;
        }
        let pos = self.names.len();
        self.index.insert(name.clone(), pos);
        self.names.push(name);
        pos
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row of the dataset. Cells are kept as the text that was read; the
/// empty string stands for null and for the "attempted, nothing usable"
/// sentinel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    values: Vec<String>,
}

impl Record {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    /// Value of the named field, `None` if the schema has no such column.
    pub fn get<'a>(&'a self, schema: &Schema, field: &str) -> Option<&'a str> {
        schema.position(field).map(|pos| self.value(pos))
    }

    /// Value at a column position; missing trailing cells read as empty.
    pub fn value(&self, pos: usize) -> &str {
        self.values.get(pos).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, pos: usize, value: String) {
        if pos >= self.values.len() {
            self.values.resize(pos + 1, String::new());
        }
        self.values[pos] = value;
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub(crate) fn pad_to(&mut self, width: usize) {
        if self.values.len() < width {
            self.values.resize(width, String::new());
        }
    }
}

/// The whole table, held in memory for the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: Schema, mut records: Vec<Record>) -> Self {
        let width = schema.len();
        for record in &mut records {
            record.pad_to(width);
        }
        Self { schema, records }
    }

    /// Make sure `name` exists on every record, defaulting to the empty
    /// sentinel. Returns the column position.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        let pos = self.schema.push(name.to_string());
        let width = self.schema.len();
        for record in &mut self.records {
            record.pad_to(width);
        }
        pos
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Batches
// ============================================================================

/// A contiguous window of the dataset, identified by its zero-based index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchSpan {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl BatchSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Partition `len` rows into windows of at most `batch_size` rows.
/// Membership depends only on row position, never on content.
pub fn batch_spans(len: usize, batch_size: usize) -> Vec<BatchSpan> {
    if batch_size == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| BatchSpan {
            index,
            start,
            end: (start + batch_size).min(len),
        })
        .collect()
}

/// Number of batches for a dataset of `len` rows.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len.div_ceil(batch_size)
    }
}

// ============================================================================
// Lookups
// ============================================================================

/// What a lookup is about, read from a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub artist: String,
    pub title: String,
    pub duration_ms: Option<i64>,
}

impl Query {
    /// Human-readable entity name for log lines.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.artist.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }
}

/// What part of a query identifies the entity being looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryScope {
    /// Artist name only (tags, genres).
    Artist,
    /// Artist and track title (lyrics, covers).
    Track,
}

/// Columns a [`Query`] is built from.
#[derive(Clone, Debug)]
pub struct QueryColumns {
    pub artist: String,
    pub title: String,
    pub duration_ms: Option<String>,
}

impl Default for QueryColumns {
    fn default() -> Self {
        Self {
            artist: "artist".to_string(),
            title: "track_name".to_string(),
            duration_ms: Some("duration_ms".to_string()),
        }
    }
}

impl QueryColumns {
    /// Build a query for `record`. Rows without an artist cannot be looked up.
    pub fn query_for(&self, schema: &Schema, record: &Record) -> Option<Query> {
        let artist = record.get(schema, &self.artist)?.trim();
        if artist.is_empty() {
            return None;
        }
        let title = record.get(schema, &self.title).unwrap_or("").trim();
        let duration_ms = self
            .duration_ms
            .as_deref()
            .and_then(|col| record.get(schema, col))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v.round() as i64);
        Some(Query {
            artist: artist.to_string(),
            title: title.to_string(),
            duration_ms,
        })
    }
}

/// Definitive answer from a lookup service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Found(Vec<String>),
    NotFound,
}

impl Lookup {
    /// Values as stored in the entity cache; `NotFound` is the empty list.
    pub fn into_values(self) -> Vec<String> {
        match self {
            Lookup::Found(values) => values,
            Lookup::NotFound => Vec::new(),
        }
    }
}

/// Render looked-up values into a target cell. An empty result renders as
/// the sentinel.
pub fn render_values(values: &[String]) -> String {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one enrichment run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    pub batches_total: usize,
    pub batches_skipped: usize,
    pub batches_processed: usize,

    pub rows_visited: usize,
    pub rows_already_enriched: usize,
    pub rows_unqueryable: usize,
    pub rows_from_cache: usize,

    pub lookups: usize,
    pub lookups_found: usize,
    pub lookups_not_found: usize,
    pub lookups_failed: usize,

    pub cache_flushes: usize,
    pub cache_flush_failures: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Share of issued lookups that produced a value, as a percentage.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            100.0 * self.lookups_found as f64 / self.lookups as f64
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize stats")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
        Ok(())
    }
}
