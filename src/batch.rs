//! Batch processor: the resumable enrichment loop.
//!
//! Batches are visited in index order. A batch with a checkpoint is skipped
//! without being read. Inside a batch, rows whose target field is already
//! enriched are skipped, cache hits are applied directly and the remaining
//! rows are looked up through a small worker pool that shares one pacer.
//! Outcomes flow back over a channel to this thread, the single writer for
//! records and cache. The checkpoint is written only after every row of the
//! batch has been visited.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::bounded;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{EntityCache, DEFAULT_SAVE_EVERY};
use crate::checkpoint::{is_record_enriched, ProgressStore, DEFAULT_MIN_ENRICHED_LEN};
use crate::lookup::{LookupClient, LookupResult};
use crate::models::{batch_spans, render_values, BatchSpan, Dataset, Query, QueryColumns, RunStats};
use crate::normalize::{cache_key, KeyStyle};
use crate::pacer::Pacer;
use crate::progress::{create_batch_bar, log_progress};
use crate::table::write_table;

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Rows between log lines in log-only mode.
const LOG_INTERVAL: u64 = 100;

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub target_field: String,
    pub min_enriched_len: usize,
    pub key_style: KeyStyle,
    pub save_every: usize,
    pub workers: usize,
    pub max_batches: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            target_field: "lyrics".to_string(),
            min_enriched_len: DEFAULT_MIN_ENRICHED_LEN,
            key_style: KeyStyle::default(),
            save_every: DEFAULT_SAVE_EVERY,
            workers: 1,
            max_batches: None,
        }
    }
}

/// One external call and the batch rows (offsets) that receive its result.
#[derive(Debug)]
struct LookupJob {
    query: Query,
    key: Option<String>,
    rows: Vec<usize>,
}

pub struct BatchProcessor<'a> {
    options: &'a BatchOptions,
    columns: &'a QueryColumns,
    client: &'a dyn LookupClient,
    pacer: &'a Pacer,
    store: &'a mut ProgressStore,
    cache: Option<&'a mut EntityCache>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        options: &'a BatchOptions,
        columns: &'a QueryColumns,
        client: &'a dyn LookupClient,
        pacer: &'a Pacer,
        store: &'a mut ProgressStore,
    ) -> Self {
        Self {
            options,
            columns,
            client,
            pacer,
            store,
            cache: None,
        }
    }

    /// Resolve through `cache` before calling the client.
    pub fn with_cache(mut self, cache: &'a mut EntityCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enrich every pending batch of `dataset`, writing one checkpoint per
    /// batch. The cache is flushed at the end even when a batch fails.
    pub fn run(&mut self, dataset: &mut Dataset) -> Result<RunStats> {
        if self.options.batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        let start = Instant::now();
        let target = dataset.ensure_column(&self.options.target_field);
        let spans = batch_spans(dataset.len(), self.options.batch_size);

        let mut stats = RunStats {
            batches_total: spans.len(),
            ..Default::default()
        };
        info!(
            "{} rows in {} batches of {} ({} already checkpointed)",
            dataset.len(),
            spans.len(),
            self.options.batch_size,
            spans.iter().filter(|s| self.store.is_batch_complete(s.index)).count()
        );

        let result = self.run_spans(dataset, target, &spans, &mut stats);

        if let Some(cache) = self.cache.as_deref_mut() {
            flush_cache(cache, &mut stats);
        }
        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        result.map(|_| stats)
    }

    fn run_spans(
        &mut self,
        dataset: &mut Dataset,
        target: usize,
        spans: &[BatchSpan],
        stats: &mut RunStats,
    ) -> Result<()> {
        for span in spans {
            if self.store.is_batch_complete(span.index) {
                stats.batches_skipped += 1;
                debug!("Batch {} already checkpointed, skipping", span.index);
                continue;
            }
            if let Some(limit) = self.options.max_batches {
                if stats.batches_processed >= limit {
                    info!("Processed {} batches, stopping as requested", limit);
                    break;
                }
            }
            self.process_batch(dataset, target, span, stats)?;
            stats.batches_processed += 1;
        }
        Ok(())
    }

    /// Visit every row of one batch, then write its checkpoint.
    fn process_batch(
        &mut self,
        dataset: &mut Dataset,
        target: usize,
        span: &BatchSpan,
        stats: &mut RunStats,
    ) -> Result<PathBuf> {
        info!("Processing batch {} : rows {} to {}", span.index, span.start, span.end);

        let scope = self.client.scope();
        let schema = &dataset.schema;
        let rows = &mut dataset.records[span.range()];
        let pb = create_batch_bar(span.len() as u64, span.index);

        let mut jobs: Vec<LookupJob> = Vec::new();
        let mut job_by_key: FxHashMap<String, usize> = FxHashMap::default();

        for (offset, record) in rows.iter_mut().enumerate() {
            stats.rows_visited += 1;

            if is_record_enriched(record.value(target), self.options.min_enriched_len) {
                stats.rows_already_enriched += 1;
                pb.inc(1);
                continue;
            }

            let Some(query) = self.columns.query_for(schema, record) else {
                stats.rows_unqueryable += 1;
                record.set(target, String::new());
                pb.inc(1);
                continue;
            };

            let Some(cache) = self.cache.as_deref() else {
                jobs.push(LookupJob {
                    query,
                    key: None,
                    rows: vec![offset],
                });
                continue;
            };

            let key = cache_key(&query, scope, self.options.key_style);
            if let Some(values) = cache.get(&key) {
                stats.rows_from_cache += 1;
                record.set(target, render_values(values));
                pb.inc(1);
                continue;
            }

            // Rows sharing a key in this batch share one call.
            match job_by_key.entry(key) {
                Entry::Occupied(entry) => jobs[*entry.get()].rows.push(offset),
                Entry::Vacant(entry) => {
                    let key = entry.key().clone();
                    entry.insert(jobs.len());
                    jobs.push(LookupJob {
                        query,
                        key: Some(key),
                        rows: vec![offset],
                    });
                }
            }
        }

        let client = self.client;
        let pacer = self.pacer;
        let workers = self.options.workers.clamp(1, jobs.len().max(1));
        let save_every = self.options.save_every.max(1);
        let mut cache = self.cache.as_deref_mut();

        dispatch_lookups(client, pacer, &jobs, workers, |index, outcome| {
            let job = &jobs[index];
            stats.lookups += 1;

            let rendered = match outcome {
                Ok(lookup) => {
                    let values = lookup.into_values();
                    if values.is_empty() {
                        stats.lookups_not_found += 1;
                        debug!("No result for {}", job.query.label());
                    } else {
                        stats.lookups_found += 1;
                    }
                    let rendered = render_values(&values);
                    if let (Some(cache), Some(key)) = (cache.as_deref_mut(), job.key.as_ref()) {
                        cache.put(key.clone(), values);
                        if cache.unsaved() >= save_every {
                            flush_cache(cache, stats);
                        }
                    }
                    rendered
                }
                Err(e) => {
                    // Not cached: a later run retries it.
                    stats.lookups_failed += 1;
                    warn!("Lookup failed for {}: {}", job.query.label(), e);
                    String::new()
                }
            };

            for &offset in &job.rows {
                rows[offset].set(target, rendered.clone());
            }
            pb.inc(job.rows.len() as u64);
            log_progress(span.index, pb.position(), span.len() as u64, LOG_INTERVAL);
        })?;

        pb.finish_with_message(format!("Batch {} done", span.index));

        let path = self.store.checkpoint_path(span.index);
        write_table(&path, &dataset.schema, &dataset.records[span.range()])
            .with_context(|| format!("Failed to write checkpoint for batch {}", span.index))?;
        self.store.mark_complete(span.index);
        info!("Batch {} saved → {}", span.index, path.display());
        Ok(path)
    }
}

/// Run `jobs` on `workers` threads, handing each outcome to `on_outcome`
/// on the calling thread. With one worker, calls follow job order.
fn dispatch_lookups<F>(
    client: &dyn LookupClient,
    pacer: &Pacer,
    jobs: &[LookupJob],
    workers: usize,
    mut on_outcome: F,
) -> Result<()>
where
    F: FnMut(usize, LookupResult),
{
    if jobs.is_empty() {
        return Ok(());
    }

    let (job_tx, job_rx) = bounded::<usize>(workers * 2);
    let (out_tx, out_rx) = bounded::<(usize, LookupResult)>(workers * 2);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = out_tx.clone();
            handles.push(scope.spawn(move || {
                while let Ok(index) = rx.recv() {
                    pacer.wait_turn();
                    let outcome = client.resolve(&jobs[index].query);
                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(job_rx);
        drop(out_tx); // receiver ends once every worker is gone

        let feeder = scope.spawn(move || {
            for index in 0..jobs.len() {
                if job_tx.send(index).is_err() {
                    break;
                }
            }
        });

        for (index, outcome) in out_rx.iter() {
            on_outcome(index, outcome);
        }

        let mut panicked = feeder.join().is_err();
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        if panicked {
            Err(anyhow!("A lookup worker panicked; batch left pending"))
        } else {
            Ok(())
        }
    })
}

/// Flush failures are logged and counted, never fatal: the lost entries are
/// simply looked up again next run.
fn flush_cache(cache: &mut EntityCache, stats: &mut RunStats) {
    match cache.flush() {
        Ok(()) => {
            stats.cache_flushes += 1;
            debug!("Cache saved ({} entries) → {}", cache.len(), cache.path().display());
        }
        Err(e) => {
            stats.cache_flush_failures += 1;
            warn!("Cache flush to {} failed: {:#}", cache.path().display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointNaming;
    use crate::lookup::LookupError;
    use crate::models::{Lookup, QueryScope, Record, Schema};
    use crate::table::read_dataset;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers "<title> lyrics", failing every `fail_every`-th call.
    struct FakeClient {
        scope: QueryScope,
        fail_every: Option<usize>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn new(scope: QueryScope) -> Self {
            Self {
                scope,
                fail_every: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LookupClient for FakeClient {
        fn source_name(&self) -> &str {
            "fake"
        }

        fn scope(&self) -> QueryScope {
            self.scope
        }

        fn resolve(&self, query: &Query) -> LookupResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(query.label());
            if self.fail_every.is_some_and(|k| n % k == 0) {
                return Err(LookupError::Http {
                    source_name: "fake".into(),
                    message: "connection reset".into(),
                });
            }
            if query.artist == "Nobody" {
                return Ok(Lookup::NotFound);
            }
            Ok(Lookup::Found(vec![format!("{} lyrics", query.title)]))
        }
    }

    fn dataset(rows: &[(&str, &str)]) -> Dataset {
        Dataset::new(
            Schema::new(["artist", "track_name"]),
            rows.iter()
                .map(|(a, t)| Record::new(vec![a.to_string(), t.to_string()]))
                .collect(),
        )
    }

    fn store(dir: &std::path::Path) -> ProgressStore {
        ProgressStore::open(dir, CheckpointNaming::new("batch", "csv").unwrap()).unwrap()
    }

    #[test]
    fn test_failures_are_isolated_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let options = BatchOptions {
            batch_size: 10,
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let mut client = FakeClient::new(QueryScope::Track);
        client.fail_every = Some(3);
        let pacer = Pacer::unpaced();

        let rows: Vec<(String, String)> = (0..6).map(|i| ("Artist".to_string(), format!("Song {i}"))).collect();
        let refs: Vec<(&str, &str)> = rows.iter().map(|(a, t)| (a.as_str(), t.as_str())).collect();
        let mut ds = dataset(&refs);

        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .run(&mut ds)
            .unwrap();

        assert_eq!(stats.lookups, 6);
        assert_eq!(stats.lookups_failed, 2);
        assert_eq!(stats.batches_processed, 1);

        let saved = read_dataset(&dir.path().join("batch_0000.csv")).unwrap();
        assert_eq!(saved.len(), 6);
        let lyrics: Vec<&str> = saved
            .records
            .iter()
            .map(|r| r.get(&saved.schema, "lyrics").unwrap())
            .collect();
        assert_eq!(
            lyrics,
            ["Song 0 lyrics", "Song 1 lyrics", "", "Song 3 lyrics", "Song 4 lyrics", ""]
        );
    }

    #[test]
    fn test_enriched_and_unqueryable_rows_are_not_looked_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let options = BatchOptions::default();
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Track);
        let pacer = Pacer::unpaced();

        let mut ds = dataset(&[("Adele", "Hello"), ("", "No Artist"), ("Sia", "Chandelier")]);
        let lyrics = ds.ensure_column("lyrics");
        ds.records[0].set(lyrics, "Hello, it's me".into());

        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .run(&mut ds)
            .unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(*client.seen.lock().unwrap(), ["Chandelier - Sia"]);
        assert_eq!(stats.rows_already_enriched, 1);
        assert_eq!(stats.rows_unqueryable, 1);
        assert_eq!(ds.records[0].value(lyrics), "Hello, it's me");
        assert_eq!(ds.records[1].value(lyrics), "");
        assert_eq!(ds.records[2].value(lyrics), "Chandelier lyrics");
    }

    #[test]
    fn test_cache_dedupes_and_remembers_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir.path().join("batches"));
        let options = BatchOptions {
            batch_size: 2,
            target_field: "tags".into(),
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Artist);
        let pacer = Pacer::unpaced();
        let cache_path = dir.path().join("cache.json");
        let mut cache = EntityCache::load(&cache_path).unwrap();

        let mut ds = dataset(&[("Adele", "Hello"), ("adele", "Skyfall"), ("Nobody", "X"), ("ADELE ", "Easy On Me")]);
        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .with_cache(&mut cache)
            .run(&mut ds)
            .unwrap();

        // "adele" once in batch 0, "nobody" once in batch 1, row 3 from cache.
        assert_eq!(client.calls(), 2);
        assert_eq!(stats.rows_from_cache, 1);
        assert_eq!(stats.lookups_not_found, 1);
        assert_eq!(stats.cache_flushes, 1);
        let tags = ds.schema.position("tags").unwrap();
        assert_eq!(ds.records[1].value(tags), "Hello lyrics");
        assert_eq!(ds.records[3].value(tags), "Hello lyrics");
        assert_eq!(ds.records[2].value(tags), "");

        let reloaded = EntityCache::load(&cache_path).unwrap();
        assert_eq!(reloaded.get("nobody"), Some(&[][..]));
        assert!(reloaded.contains("adele"));
    }

    #[test]
    fn test_max_batches_limits_processing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let options = BatchOptions {
            batch_size: 1,
            max_batches: Some(2),
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Track);
        let pacer = Pacer::unpaced();
        let mut ds = dataset(&[("A", "One"), ("B", "Two"), ("C", "Three")]);

        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .run(&mut ds)
            .unwrap();
        assert_eq!(stats.batches_processed, 2);
        assert_eq!(store.completed(), vec![0, 1]);
    }

    #[test]
    fn test_worker_pool_visits_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let options = BatchOptions {
            batch_size: 50,
            workers: 4,
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Track);
        let pacer = Pacer::unpaced();

        let rows: Vec<(String, String)> = (0..120).map(|i| (format!("Artist {i}"), format!("Song {i}"))).collect();
        let refs: Vec<(&str, &str)> = rows.iter().map(|(a, t)| (a.as_str(), t.as_str())).collect();
        let mut ds = dataset(&refs);

        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .run(&mut ds)
            .unwrap();
        assert_eq!(client.calls(), 120);
        assert_eq!(stats.batches_processed, 3);
        let lyrics = ds.schema.position("lyrics").unwrap();
        for (i, record) in ds.records.iter().enumerate() {
            assert_eq!(record.value(lyrics), format!("Song {i} lyrics"));
        }
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        let options = BatchOptions {
            batch_size: 0,
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Track);
        let pacer = Pacer::unpaced();
        let mut ds = dataset(&[("A", "One")]);
        assert!(BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .run(&mut ds)
            .is_err());
    }

    #[test]
    fn test_unwritable_cache_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut cache = EntityCache::load(&blocker.join("cache.json")).unwrap();
        assert!(cache.is_empty());

        let out_dir = dir.path().join("batches");
        let mut store = store(&out_dir);
        let options = BatchOptions {
            target_field: "genres".into(),
            save_every: 1,
            ..Default::default()
        };
        let columns = QueryColumns::default();
        let client = FakeClient::new(QueryScope::Artist);
        let pacer = Pacer::unpaced();
        let mut ds = dataset(&[("Adele", "Hello"), ("Sia", "Alive"), ("Adele", "Skyfall")]);

        let stats = BatchProcessor::new(&options, &columns, &client, &pacer, &mut store)
            .with_cache(&mut cache)
            .run(&mut ds)
            .unwrap();

        assert_eq!(client.calls(), 2);
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.cache_flushes, 0);
        assert!(stats.cache_flush_failures > 0);
        assert!(out_dir.join("batch_0000.csv").exists());
        assert_eq!(cache.len(), 2);
    }
}
