//! Spotify Web API lookups.
//!
//! Two fields come from the same search endpoint: the album cover of a track
//! (track scope) and the genres of an artist (artist scope, meant to run with
//! the entity cache). Auth is the client-credentials flow; the token is
//! fetched on first use and renewed shortly before it expires.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{http_agent, parse_error, transport_error, LookupClient, LookupError, LookupResult};
use crate::models::{Lookup, Query, QueryScope};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SOURCE_NAME: &str = "spotify";

pub const CLIENT_ID_ENV: &str = "SPOTIPY_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SPOTIPY_CLIENT_SECRET";

/// Renew this long before the token's advertised expiry.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// What a Spotify lookup fills in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpotifyField {
    /// URL of the largest album image of the best track match.
    AlbumCover,
    /// Genre list of the best artist match.
    ArtistGenres,
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TrackSearch {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    album: Option<SpotifyAlbum>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    artists: ArtistPage,
}

#[derive(Debug, Deserialize)]
struct ArtistPage {
    #[serde(default)]
    items: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    #[serde(default)]
    genres: Vec<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    http: ureq::Agent,
    client_id: String,
    client_secret: String,
    field: SpotifyField,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String, field: SpotifyField, timeout: Duration) -> Self {
        Self {
            http: http_agent(timeout),
            client_id,
            client_secret,
            field,
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a new one when missing or about to
    /// expire. Workers wait on the lock instead of all fetching at once.
    fn access_token(&self) -> Result<String, LookupError> {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = guard.as_ref() {
            if Instant::now() + TOKEN_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(SPOTIFY_TOKEN_URL)
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .map_err(|e| transport_error(SOURCE_NAME, e))?;
        let token: TokenResponse = response
            .into_json()
            .map_err(|e| parse_error(SOURCE_NAME, e))?;

        let value = token.access_token.clone();
        *guard = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    fn forget_token(&self) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyClient")
            .field("client_id", &self.client_id)
            .field("field", &self.field)
            .finish()
    }
}

/// Search parameters (`q`, `type`) for a query, `None` when the query
/// cannot identify the entity.
pub fn search_params(field: SpotifyField, query: &Query) -> Option<(String, &'static str)> {
    match field {
        SpotifyField::AlbumCover if query.title.is_empty() => None,
        SpotifyField::AlbumCover => Some((format!("track:{} artist:{}", query.title, query.artist), "track")),
        SpotifyField::ArtistGenres => Some((format!("artist:{}", query.artist), "artist")),
    }
}

/// Extract the field from a search response. Only the top hit counts.
pub fn interpret(field: SpotifyField, body: Value) -> LookupResult {
    match field {
        SpotifyField::AlbumCover => {
            let search: TrackSearch = serde_json::from_value(body).map_err(|e| parse_error(SOURCE_NAME, e))?;
            let url = search
                .tracks
                .items
                .into_iter()
                .next()
                .and_then(|track| track.album)
                .and_then(|album| album.images.into_iter().next())
                .map(|image| image.url)
                .filter(|url| !url.trim().is_empty());
            Ok(url.map_or(Lookup::NotFound, |url| Lookup::Found(vec![url])))
        }
        SpotifyField::ArtistGenres => {
            let search: ArtistSearch = serde_json::from_value(body).map_err(|e| parse_error(SOURCE_NAME, e))?;
            let genres = search
                .artists
                .items
                .into_iter()
                .next()
                .map(|artist| artist.genres)
                .unwrap_or_default();
            Ok(if genres.is_empty() {
                Lookup::NotFound
            } else {
                Lookup::Found(genres)
            })
        }
    }
}

impl LookupClient for SpotifyClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn scope(&self) -> QueryScope {
        match self.field {
            SpotifyField::AlbumCover => QueryScope::Track,
            SpotifyField::ArtistGenres => QueryScope::Artist,
        }
    }

    fn resolve(&self, query: &Query) -> LookupResult {
        let Some((q, kind)) = search_params(self.field, query) else {
            return Ok(Lookup::NotFound);
        };
        let token = self.access_token()?;

        let response = self
            .http
            .get(&format!("{}/search", SPOTIFY_API_BASE))
            .set("Authorization", &format!("Bearer {}", token))
            .query("q", &q)
            .query("type", kind)
            .query("limit", "1")
            .call();

        let body: Value = match response {
            Ok(response) => response.into_json().map_err(|e| parse_error(SOURCE_NAME, e))?,
            Err(e) => {
                // Revoked or expired early: fetch a fresh token next call.
                if matches!(e, ureq::Error::Status(401, _)) {
                    self.forget_token();
                }
                return Err(transport_error(SOURCE_NAME, e));
            }
        };

        interpret(self.field, body)
    }
}
