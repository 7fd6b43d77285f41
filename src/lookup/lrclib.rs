//! LRCLIB lyrics lookup.
//!
//! Searches `https://lrclib.net/api/search` by track and artist, scores the
//! candidates and returns the plain lyrics of the best acceptable one.

use serde::Deserialize;
use std::time::Duration;

use super::{http_agent, parse_error, transport_error, LookupClient, LookupError, LookupResult};
use crate::models::{Lookup, Query, QueryScope};
use crate::scoring::{candidate_score, Candidate, ACCEPT_THRESHOLD};

const LRCLIB_API_BASE: &str = "https://lrclib.net/api";
const SOURCE_NAME: &str = "lrclib";

/// One entry of a search response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrclibTrack {
    #[serde(default)]
    pub track_name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub instrumental: bool,
    #[serde(default)]
    pub plain_lyrics: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LrclibClient {
    http: ureq::Agent,
    base_url: String,
}

impl LrclibClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(LRCLIB_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: http_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl LookupClient for LrclibClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn scope(&self) -> QueryScope {
        QueryScope::Track
    }

    fn resolve(&self, query: &Query) -> LookupResult {
        if query.title.is_empty() {
            return Ok(Lookup::NotFound);
        }
        let response = self
            .http
            .get(&format!("{}/search", self.base_url))
            .query("track_name", &query.title)
            .query("artist_name", &query.artist)
            .call();

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return status_outcome(status),
            Err(e) => return Err(transport_error(SOURCE_NAME, e)),
        };

        let candidates: Vec<LrclibTrack> = response
            .into_json()
            .map_err(|e| parse_error(SOURCE_NAME, e))?;

        Ok(pick_lyrics(query, &candidates))
    }
}

/// Outcome of a non-2xx search response: 404 means the track is unknown,
/// anything else is a failed call.
fn status_outcome(status: u16) -> LookupResult {
    if status == 404 {
        Ok(Lookup::NotFound)
    } else {
        Err(LookupError::Status {
            source_name: SOURCE_NAME.to_string(),
            status,
        })
    }
}

/// Best-scoring candidate with lyrics, if any clears the threshold.
/// Instrumentals never count as found.
pub fn pick_lyrics(query: &Query, candidates: &[LrclibTrack]) -> Lookup {
    candidates
        .iter()
        .filter(|c| !c.instrumental)
        .filter_map(|c| {
            let lyrics = c.plain_lyrics.as_deref()?.trim();
            if lyrics.is_empty() {
                return None;
            }
            let score = candidate_score(
                query,
                &Candidate {
                    title: &c.track_name,
                    artist: &c.artist_name,
                    duration_sec: c.duration,
                },
            );
            (score >= ACCEPT_THRESHOLD).then_some((score, lyrics))
        })
        // First candidate wins ties: the service already ranks by relevance.
        .fold(None, |best: Option<(i32, &str)>, (score, lyrics)| match best {
            Some((best_score, _)) if best_score >= score => best,
            _ => Some((score, lyrics)),
        })
        .map(|(_, lyrics)| Lookup::Found(vec![lyrics.to_string()]))
        .unwrap_or(Lookup::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::testing::serve_once;

    fn query() -> Query {
        Query {
            artist: "Adele".into(),
            title: "Hello".into(),
            duration_ms: Some(295_493),
        }
    }

    fn parse(json: &str) -> Vec<LrclibTrack> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_picks_best_scoring_candidate() {
        let candidates = parse(
            r#"[
                {"trackName":"Hello","artistName":"Adele","duration":330.0,"instrumental":false,"plainLyrics":"Hello, it's me (long edit)"},
                {"trackName":"Hello","artistName":"Adele","duration":295.0,"instrumental":false,"plainLyrics":"Hello, it's me","syncedLyrics":"[00:01.00] Hello"}
            ]"#,
        );
        assert_eq!(
            pick_lyrics(&query(), &candidates),
            Lookup::Found(vec!["Hello, it's me".into()])
        );
    }

    #[test]
    fn test_instrumental_and_empty_lyrics_are_not_found() {
        let candidates = parse(
            r#"[
                {"trackName":"Hello","artistName":"Adele","duration":295.0,"instrumental":true,"plainLyrics":null},
                {"trackName":"Hello","artistName":"Adele","duration":295.0,"instrumental":false,"plainLyrics":"   "}
            ]"#,
        );
        assert_eq!(pick_lyrics(&query(), &candidates), Lookup::NotFound);
    }

    #[test]
    fn test_other_artist_is_not_found() {
        let candidates = parse(
            r#"[{"trackName":"Hello","artistName":"Lionel Richie","duration":295.0,"plainLyrics":"Is it me you're looking for"}]"#,
        );
        assert_eq!(pick_lyrics(&query(), &candidates), Lookup::NotFound);
        assert_eq!(pick_lyrics(&query(), &[]), Lookup::NotFound);
    }

    #[test]
    fn test_http_404_is_not_found() {
        let base = serve_once("404 Not Found", "");
        let client = LrclibClient::with_base_url(&base, Duration::from_secs(5));
        assert_eq!(client.resolve(&query()).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_http_server_error_is_a_failure() {
        let base = serve_once("503 Service Unavailable", "");
        let client = LrclibClient::with_base_url(&base, Duration::from_secs(5));
        let err = client.resolve(&query()).unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 503, .. }));
    }

    #[test]
    fn test_http_search_response_is_scored() {
        let base = serve_once(
            "200 OK",
            r#"[{"trackName":"Hello","artistName":"Adele","duration":295.0,"plainLyrics":"Hello, it's me"}]"#,
        );
        let client = LrclibClient::with_base_url(&base, Duration::from_secs(5));
        assert_eq!(
            client.resolve(&query()).unwrap(),
            Lookup::Found(vec!["Hello, it's me".into()])
        );
    }

    #[test]
    fn test_status_outcome() {
        assert_eq!(status_outcome(404).unwrap(), Lookup::NotFound);
        assert!(matches!(status_outcome(429), Err(LookupError::Status { status: 429, .. })));
    }

    #[test]
    fn test_client_metadata() {
        let client = LrclibClient::with_base_url("http://localhost:9/api/", Duration::from_secs(1));
        assert_eq!(client.base_url, "http://localhost:9/api");
        assert_eq!(client.scope(), QueryScope::Track);
        assert_eq!(client.source_name(), "lrclib");
    }
}
