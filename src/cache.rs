//! Persistent entity cache.
//!
//! Maps a normalized lookup key to the values a lookup returned. A key that
//! maps to an empty list was looked up and found nothing; it is never queried
//! again. The whole map is rewritten on every flush.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::table::tmp_path;

/// Default number of resolutions between flushes.
pub const DEFAULT_SAVE_EVERY: usize = 50;

#[derive(Debug)]
pub struct EntityCache {
    path: PathBuf,
    entries: FxHashMap<String, Vec<String>>,
    unsaved: usize,
}

impl EntityCache {
    /// Load the snapshot at `path`, or start empty if there is none.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read cache {}", path.display()))?;
            if text.trim().is_empty() {
                FxHashMap::default()
            } else {
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse cache {}", path.display()))?
            }
        } else {
            FxHashMap::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            unsaved: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Some` if the key was ever resolved, including to nothing.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn put(&mut self, key: String, values: Vec<String>) {
        self.entries.insert(key, values);
        self.unsaved += 1;
    }

    /// Resolutions since the last successful flush.
    pub fn unsaved(&self) -> usize {
        self.unsaved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the full snapshot, keys sorted, replacing the previous one.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Create directory {}", parent.display()))?;
            }
        }
        let sorted: BTreeMap<&String, &Vec<String>> = self.entries.iter().collect();
        let json = serde_json::to_string(&sorted)?;
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, json).with_context(|| format!("Write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Rename {} -> {}", tmp.display(), self.path.display()))?;
        self.unsaved = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_empty_differs_from_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EntityCache::load(&dir.path().join("cache.json")).unwrap();
        assert!(cache.is_empty());

        cache.put("nobody".into(), vec![]);
        assert_eq!(cache.get("nobody"), Some(&[][..]));
        assert_eq!(cache.get("somebody"), None);
        assert_eq!(cache.unsaved(), 1);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artist_genre_cache.json");
        let mut cache = EntityCache::load(&path).unwrap();
        cache.put("daft punk".into(), vec!["electronic".into(), "house".into()]);
        cache.put("unknown act".into(), vec![]);
        cache.flush().unwrap();
        assert_eq!(cache.unsaved(), 0);
        assert!(!tmp_path(&path).exists());

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, r#"{"daft punk":["electronic","house"],"unknown act":[]}"#);

        let reloaded = EntityCache::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("daft punk").unwrap(), ["electronic", "house"]);
        assert!(reloaded.contains("unknown act"));
    }

    #[test]
    fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        assert!(EntityCache::load(&path).is_err());
    }
}
