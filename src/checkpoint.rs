//! Progress tracking for resumable runs.
//!
//! Batch-level progress is the set of checkpoint files in the output
//! directory; there is no separate manifest. Row-level progress is read from
//! the record's own target field.

use anyhow::{Context, Result};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default minimum length a target value must exceed to count as enriched.
pub const DEFAULT_MIN_ENRICHED_LEN: usize = 5;

/// `<prefix>_<NNNN>.<ext>` naming for checkpoint files.
#[derive(Clone, Debug)]
pub struct CheckpointNaming {
    prefix: String,
    extension: String,
    pattern: Regex,
}

impl CheckpointNaming {
    pub fn new(prefix: &str, extension: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}_(\d+)\.{}$",
            regex::escape(prefix),
            regex::escape(extension)
        ))
        .context("Invalid checkpoint prefix")?;
        Ok(Self {
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            pattern,
        })
    }

    pub fn file_name(&self, index: usize) -> String {
        format!("{}_{:04}.{}", self.prefix, index, self.extension)
    }

    /// Recover the batch index from a file name. Anything that does not have
    /// the exact checkpoint shape yields `None`.
    pub fn parse_index(&self, file_name: &str) -> Option<usize> {
        self.pattern
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Order in which checkpoint files are listed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckpointOrder {
    /// Directory listing order, whatever the filesystem returns.
    #[default]
    Discovery,
    ByIndex,
}

/// Which batches already have a checkpoint.
#[derive(Debug)]
pub struct ProgressStore {
    dir: PathBuf,
    naming: CheckpointNaming,
    completed: FxHashSet<usize>,
}

impl ProgressStore {
    /// Scan `dir` for checkpoints. A missing directory means no progress.
    pub fn open(dir: &Path, naming: CheckpointNaming) -> Result<Self> {
        let mut store = Self {
            dir: dir.to_path_buf(),
            naming,
            completed: FxHashSet::default(),
        };
        for (index, _) in store.scan()? {
            store.completed.insert(index);
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_batch_complete(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn mark_complete(&mut self, index: usize) {
        self.completed.insert(index);
    }

    /// Completed batch indices, ascending.
    pub fn completed(&self) -> Vec<usize> {
        let mut done: Vec<usize> = self.completed.iter().copied().collect();
        done.sort_unstable();
        done
    }

    pub fn checkpoint_path(&self, index: usize) -> PathBuf {
        self.dir.join(self.naming.file_name(index))
    }

    /// Checkpoint files currently on disk.
    pub fn checkpoint_files(&self, order: CheckpointOrder) -> Result<Vec<(usize, PathBuf)>> {
        let mut files = self.scan()?;
        if order == CheckpointOrder::ByIndex {
            files.sort_by_key(|(index, _)| *index);
        }
        Ok(files)
    }

    /// Files in the output directory that are not checkpoints (leftover
    /// temp files, foreign files).
    pub fn stray_files(&self) -> Result<Vec<PathBuf>> {
        let mut stray = Vec::new();
        for (name, path) in self.list_dir()? {
            if self.naming.parse_index(&name).is_none() {
                stray.push(path);
            }
        }
        Ok(stray)
    }

    fn scan(&self) -> Result<Vec<(usize, PathBuf)>> {
        Ok(self
            .list_dir()?
            .into_iter()
            .filter_map(|(name, path)| self.naming.parse_index(&name).map(|index| (index, path)))
            .collect())
    }

    fn list_dir(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push((name.to_string(), entry.path()));
            }
        }
        Ok(files)
    }
}

/// A target value counts as enriched when it holds more than `min_len`
/// characters. The empty sentinel never does.
pub fn is_record_enriched(value: &str, min_len: usize) -> bool {
    value.chars().count() > min_len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> CheckpointNaming {
        CheckpointNaming::new("spotify_batch", "csv").unwrap()
    }

    #[test]
    fn test_file_name_round_trip() {
        let n = naming();
        assert_eq!(n.file_name(7), "spotify_batch_0007.csv");
        assert_eq!(n.parse_index("spotify_batch_0007.csv"), Some(7));
        assert_eq!(n.parse_index("spotify_batch_12345.csv"), Some(12345));
    }

    #[test]
    fn test_malformed_names_are_ignored() {
        let n = naming();
        assert_eq!(n.parse_index("spotify_batch_0007.csv.tmp"), None);
        assert_eq!(n.parse_index("spotify_batch_.csv"), None);
        assert_eq!(n.parse_index("spotify_batch_00x1.csv"), None);
        assert_eq!(n.parse_index("batch_0001.csv"), None);
        assert_eq!(n.parse_index("spotify_batch_0001.json"), None);
    }

    #[test]
    fn test_store_scans_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["spotify_batch_0000.csv", "spotify_batch_0002.csv", "spotify_batch_0001.csv.tmp", "notes.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("spotify_batch_0003.csv")).unwrap();

        let mut store = ProgressStore::open(dir.path(), naming()).unwrap();
        assert!(store.is_batch_complete(0));
        assert!(!store.is_batch_complete(1));
        assert!(store.is_batch_complete(2));
        assert!(!store.is_batch_complete(3));
        assert_eq!(store.completed(), vec![0, 2]);
        assert_eq!(store.stray_files().unwrap().len(), 2);

        let ordered = store.checkpoint_files(CheckpointOrder::ByIndex).unwrap();
        assert_eq!(ordered.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);

        store.mark_complete(1);
        assert!(store.is_batch_complete(1));
    }

    #[test]
    fn test_missing_directory_is_empty_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(&dir.path().join("absent"), naming()).unwrap();
        assert!(store.completed().is_empty());
        assert!(store.checkpoint_files(CheckpointOrder::Discovery).unwrap().is_empty());
    }

    #[test]
    fn test_record_enriched_threshold() {
        assert!(!is_record_enriched("", DEFAULT_MIN_ENRICHED_LEN));
        assert!(!is_record_enriched("short", DEFAULT_MIN_ENRICHED_LEN));
        assert!(is_record_enriched("longer", DEFAULT_MIN_ENRICHED_LEN));
        // Counted in characters, not bytes.
        assert!(!is_record_enriched("éééé", DEFAULT_MIN_ENRICHED_LEN));
    }
}
