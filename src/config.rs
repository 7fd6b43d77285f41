//! Job configuration: CLI arguments resolved into a validated [`EnrichConfig`].
//!
//! Each lookup source brings its own defaults (target column, checkpoint
//! prefix, pause). Anything invalid or missing is reported here, before a
//! single batch is touched.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::batch::{BatchOptions, DEFAULT_BATCH_SIZE};
use crate::cache::DEFAULT_SAVE_EVERY;
use crate::checkpoint::{CheckpointNaming, CheckpointOrder, DEFAULT_MIN_ENRICHED_LEN};
use crate::lookup::{lastfm, spotify, LastFmClient, LookupClient, LrclibClient, SpotifyClient, SpotifyField};
use crate::models::QueryColumns;
use crate::normalize::KeyStyle;
use crate::safety::{validate_input_path, validate_output_path};

/// Extension of dataset and checkpoint files.
pub const TABLE_EXTENSION: &str = "csv";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Plain lyrics from lrclib.net, per track
    Lrclib,
    /// Artist tags from Last.fm (needs LASTFM_API_KEY)
    Lastfm,
    /// Album cover URL from Spotify, per track (needs SPOTIPY_CLIENT_ID/SECRET)
    SpotifyCovers,
    /// Artist genres from Spotify (needs SPOTIPY_CLIENT_ID/SECRET)
    SpotifyGenres,
}

impl Source {
    pub fn default_target(self) -> &'static str {
        match self {
            Source::Lrclib => "lyrics",
            Source::Lastfm => "lastfm_tags",
            Source::SpotifyCovers => "album_cover_url",
            Source::SpotifyGenres => "genres",
        }
    }

    pub fn default_prefix(self) -> &'static str {
        match self {
            Source::Lrclib => "batch",
            Source::Lastfm => "lastfm_batch",
            Source::SpotifyCovers => "spotify_batch",
            Source::SpotifyGenres => "genre_batch",
        }
    }

    pub fn default_pause(self) -> Duration {
        match self {
            Source::Lrclib => Duration::from_secs(1),
            Source::Lastfm => Duration::from_millis(250),
            Source::SpotifyCovers => Duration::from_millis(500),
            Source::SpotifyGenres => Duration::from_millis(100),
        }
    }

    /// Sources keyed by artist, where the entity cache saves most calls.
    pub fn is_artist_scoped(self) -> bool {
        matches!(self, Source::Lastfm | Source::SpotifyGenres)
    }
}

/// Options shared by `run`, `merge` and `status`.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Input dataset (CSV with a header row)
    #[arg(long)]
    pub input: PathBuf,

    /// Directory for per-batch checkpoint files
    #[arg(long, default_value = "batches")]
    pub output_dir: PathBuf,

    /// Merged output [default: <input>_enriched.csv next to the input]
    #[arg(long = "final")]
    pub final_output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Source::Lrclib)]
    pub source: Source,

    /// Checkpoint file prefix [default depends on source]
    #[arg(long)]
    pub prefix: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Minimum time between lookup calls [default depends on source]
    #[arg(long)]
    pub pause_ms: Option<u64>,

    /// Column receiving the lookup result [default depends on source]
    #[arg(long)]
    pub target: Option<String>,

    /// JSON entity cache; lookups already in it are never repeated
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Flush the cache after this many new entries
    #[arg(long, default_value_t = DEFAULT_SAVE_EVERY)]
    pub save_every: usize,

    /// Concurrent lookup workers (calls stay paced in aggregate)
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Target values longer than this count as already enriched
    #[arg(long, default_value_t = DEFAULT_MIN_ENRICHED_LEN)]
    pub min_enriched_len: usize,

    #[arg(long, default_value = "artist")]
    pub artist_column: String,

    #[arg(long, default_value = "track_name")]
    pub title_column: String,

    /// Duration column in milliseconds; empty to disable
    #[arg(long, default_value = "duration_ms")]
    pub duration_column: String,

    /// Stop after processing this many batches
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Fold accents and edition suffixes in cache keys
    #[arg(long)]
    pub fold_keys: bool,

    /// Merge checkpoints by batch index instead of directory order
    #[arg(long)]
    pub sorted_merge: bool,

    /// HTTP timeout per lookup call
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Last.fm: ignore tags with fewer votes than this
    #[arg(long, default_value_t = lastfm::DEFAULT_MIN_TAG_COUNT)]
    pub min_tag_count: u32,

    /// Last.fm: keep at most this many tags per artist
    #[arg(long, default_value_t = lastfm::DEFAULT_MAX_TAGS)]
    pub max_tags: usize,
}

/// A fully resolved enrichment job.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub source: Source,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub final_output: PathBuf,
    pub naming: CheckpointNaming,
    pub batch: BatchOptions,
    pub columns: QueryColumns,
    pub pause: Duration,
    pub cache_path: Option<PathBuf>,
    pub merge_order: CheckpointOrder,
    pub timeout: Duration,
    pub min_tag_count: u32,
    pub max_tags: usize,
}

impl EnrichConfig {
    pub fn from_args(args: &JobArgs) -> Result<Self> {
        if args.batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        if args.save_every == 0 {
            bail!("--save-every must be at least 1");
        }
        if args.workers == 0 {
            bail!("--workers must be at least 1");
        }

        let prefix = args
            .prefix
            .clone()
            .unwrap_or_else(|| args.source.default_prefix().to_string());
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            bail!("Invalid checkpoint prefix '{}'", prefix);
        }
        let naming = CheckpointNaming::new(&prefix, TABLE_EXTENSION)?;

        let target = args
            .target
            .clone()
            .unwrap_or_else(|| args.source.default_target().to_string());
        if target.trim().is_empty() {
            bail!("--target cannot be empty");
        }

        let final_output = args
            .final_output
            .clone()
            .unwrap_or_else(|| default_final_path(&args.input));
        validate_input_path(&args.input, &args.output_dir, &naming)?;
        validate_output_path(&final_output, &args.input, &args.output_dir, &naming)?;

        if args.max_tags == 0 {
            bail!("--max-tags must be at least 1");
        }
        if args.source.is_artist_scoped() && args.cache.is_none() {
            warn!("Running artist lookups without --cache; repeated artists are looked up again");
        }

        let duration_column = Some(args.duration_column.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self {
            source: args.source,
            input: args.input.clone(),
            output_dir: args.output_dir.clone(),
            final_output,
            naming,
            batch: BatchOptions {
                batch_size: args.batch_size,
                target_field: target,
                min_enriched_len: args.min_enriched_len,
                key_style: if args.fold_keys {
                    KeyStyle::Folded
                } else {
                    KeyStyle::Lowercase
                },
                save_every: args.save_every,
                workers: args.workers,
                max_batches: args.max_batches,
            },
            columns: QueryColumns {
                artist: args.artist_column.clone(),
                title: args.title_column.clone(),
                duration_ms: duration_column,
            },
            pause: args
                .pause_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| args.source.default_pause()),
            cache_path: args.cache.clone(),
            merge_order: if args.sorted_merge {
                CheckpointOrder::ByIndex
            } else {
                CheckpointOrder::Discovery
            },
            timeout: Duration::from_secs(args.timeout_secs.max(1)),
            min_tag_count: args.min_tag_count,
            max_tags: args.max_tags,
        })
    }

    /// Build the lookup client for the configured source. Credentials come
    /// from the environment (a `.env` file is honored).
    pub fn build_client(&self) -> Result<Box<dyn LookupClient>> {
        match self.source {
            Source::Lrclib => Ok(Box::new(LrclibClient::new(self.timeout))),
            Source::Lastfm => {
                let api_key = required_env(lastfm::API_KEY_ENV)?;
                let client = LastFmClient::new(api_key, self.timeout).with_limits(self.min_tag_count, self.max_tags);
                Ok(Box::new(client))
            }
            Source::SpotifyCovers | Source::SpotifyGenres => {
                let client_id = required_env(spotify::CLIENT_ID_ENV)?;
                let client_secret = required_env(spotify::CLIENT_SECRET_ENV)?;
                let field = if self.source == Source::SpotifyCovers {
                    SpotifyField::AlbumCover
                } else {
                    SpotifyField::ArtistGenres
                };
                Ok(Box::new(SpotifyClient::new(client_id, client_secret, field, self.timeout)))
            }
        }
    }
}

/// A credential that must be present and non-blank.
fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} is not set (environment or .env)", name))
}

/// `<dir>/<stem>_enriched.csv` next to the input.
pub fn default_final_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    input.with_file_name(format!("{}_enriched.{}", stem, TABLE_EXTENSION))
}
