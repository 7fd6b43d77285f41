use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use music_enrich::batch::BatchProcessor;
use music_enrich::cache::EntityCache;
use music_enrich::checkpoint::ProgressStore;
use music_enrich::config::{EnrichConfig, JobArgs};
use music_enrich::merge::{merge_checkpoints, MergeReport};
use music_enrich::models::{batch_count, RunStats};
use music_enrich::pacer::Pacer;
use music_enrich::progress::{format_duration, set_log_only};
use music_enrich::table::read_dataset;

#[derive(Parser)]
#[command(name = "music-enrich")]
#[command(about = "Resumable batch enrichment of music datasets from external lookup services")]
struct Cli {
    /// Log progress lines instead of progress bars (for tail -f)
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enrich every pending batch, then merge the checkpoints
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Leave the checkpoints unmerged
        #[arg(long)]
        no_merge: bool,

        /// Write run statistics as JSON
        #[arg(long)]
        stats: Option<PathBuf>,
    },
    /// Merge existing checkpoints into the final dataset
    Merge {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Show completed and pending batches
    Status {
        #[command(flatten)]
        job: JobArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    set_log_only(cli.log_only);
    dotenvy::dotenv().ok();

    match cli.command {
        Command::Run { job, no_merge, stats } => run(&job, no_merge, stats.as_deref()),
        Command::Merge { job } => merge(&job),
        Command::Status { job } => status(&job),
    }
}

fn run(job: &JobArgs, no_merge: bool, stats_path: Option<&Path>) -> Result<()> {
    let start = Instant::now();
    let config = EnrichConfig::from_args(job)?;
    let client = config.build_client()?;
    let mut cache = config
        .cache_path
        .as_deref()
        .map(EntityCache::load)
        .transpose()?;
    if let Some(cache) = &cache {
        info!("Cache: {} entries from {}", cache.len(), cache.path().display());
    }

    info!("Loading dataset: {}", config.input.display());
    let mut dataset = read_dataset(&config.input)?;
    info!("Loaded {} rows, {} columns", dataset.len(), dataset.schema.len());

    let mut store = ProgressStore::open(&config.output_dir, config.naming.clone())?;
    let pacer = Pacer::new(config.pause);
    info!(
        "Source: {}, target column '{}', pause {:?}, {} worker(s)",
        client.source_name(),
        config.batch.target_field,
        pacer.pause(),
        config.batch.workers
    );

    let mut processor = BatchProcessor::new(&config.batch, &config.columns, client.as_ref(), &pacer, &mut store);
    if let Some(cache) = cache.as_mut() {
        processor = processor.with_cache(cache);
    }
    let stats = processor.run(&mut dataset)?;

    let pending = stats.batches_total.saturating_sub(stats.batches_skipped + stats.batches_processed);
    if pending > 0 {
        warn!("{} batches still pending; rerun to continue", pending);
    }

    let merged = if no_merge {
        None
    } else {
        Some(merge_checkpoints(&store, config.merge_order, &config.final_output)?)
    };

    print_summary(&stats, merged.as_ref(), start.elapsed());

    if let Some(path) = stats_path {
        stats.write_to_file(path)?;
        info!("Stats written to {}", path.display());
    }
    Ok(())
}

fn merge(job: &JobArgs) -> Result<()> {
    let config = EnrichConfig::from_args(job)?;
    let store = ProgressStore::open(&config.output_dir, config.naming.clone())?;
    let report = merge_checkpoints(&store, config.merge_order, &config.final_output)?;
    if report.files > 0 {
        println!("Final dataset saved to {} ({} rows from {} checkpoints)", report.output.display(), report.rows, report.files);
    }
    Ok(())
}

fn status(job: &JobArgs) -> Result<()> {
    let config = EnrichConfig::from_args(job)?;
    let dataset = read_dataset(&config.input)?;
    let total = batch_count(dataset.len(), config.batch.batch_size);
    let store = ProgressStore::open(&config.output_dir, config.naming.clone())?;

    let completed = store.completed();
    let pending: Vec<usize> = (0..total).filter(|i| !store.is_batch_complete(*i)).collect();
    let foreign: Vec<usize> = completed.iter().copied().filter(|&i| i >= total).collect();
    let stray = store.stray_files()?;

    println!("{:=<60}", "");
    println!("Dataset: {} ({} rows)", config.input.display(), dataset.len());
    println!("Checkpoints: {}", store.dir().display());
    println!("  Batches:   {} of {} rows each", total, config.batch.batch_size);
    println!("  Completed: {} [{}]", completed.len() - foreign.len(), format_indices(&completed));
    println!("  Pending:   {} [{}]", pending.len(), format_indices(&pending));
    if !foreign.is_empty() {
        println!("  Beyond dataset end (batch size changed?): [{}]", format_indices(&foreign));
    }
    if !stray.is_empty() {
        println!("  Ignored files:");
        for path in &stray {
            println!("    {}", path.display());
        }
    }
    println!("{:=<60}", "");
    Ok(())
}

fn print_summary(stats: &RunStats, merged: Option<&MergeReport>, elapsed: Duration) {
    println!("\n{:=<60}", "");
    println!("Enrichment complete!");
    println!(
        "  Batches: {} total, {} skipped, {} processed",
        stats.batches_total, stats.batches_skipped, stats.batches_processed
    );
    println!(
        "  Rows: {} visited, {} already enriched, {} from cache, {} without artist",
        stats.rows_visited, stats.rows_already_enriched, stats.rows_from_cache, stats.rows_unqueryable
    );
    println!(
        "  Lookups: {} ({} found, {} not found, {} failed, {:.1}% hit rate)",
        stats.lookups,
        stats.lookups_found,
        stats.lookups_not_found,
        stats.lookups_failed,
        stats.hit_rate()
    );
    if stats.cache_flushes + stats.cache_flush_failures > 0 {
        println!(
            "  Cache flushes: {} ({} failed)",
            stats.cache_flushes, stats.cache_flush_failures
        );
    }
    match merged {
        Some(report) if report.files > 0 => println!(
            "  Final dataset saved to {} ({} rows)",
            report.output.display(),
            report.rows
        ),
        Some(_) => println!("  Nothing to merge"),
        None => println!("  Merge skipped"),
    }
    println!("  Elapsed: {}", format_duration(elapsed));
    println!("{:=<60}", "");
}

/// `0-3, 7, 9-10`
fn format_indices(indices: &[usize]) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{}-{}", start, end)
        });
    }
    parts.join(", ")
}
