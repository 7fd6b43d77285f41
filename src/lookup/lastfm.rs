//! Last.fm artist tag lookup.
//!
//! Fetches the folksonomy tags of an artist (`artist.getTopTags`). Tags are
//! lowercased, low-vote noise is dropped and the list is capped. Meant to run
//! with the entity cache, keyed by artist.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{http_agent, parse_error, transport_error, LookupClient, LookupError, LookupResult};
use crate::models::{Lookup, Query, QueryScope};

const LASTFM_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";
const SOURCE_NAME: &str = "lastfm";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "LASTFM_API_KEY";

/// Last.fm error code for an unknown artist.
const ERROR_INVALID_PARAMETERS: i64 = 6;

/// Minimum tag count to include.
pub const DEFAULT_MIN_TAG_COUNT: u32 = 10;
pub const DEFAULT_MAX_TAGS: usize = 10;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TopTagsResponse {
    toptags: TopTags,
}

#[derive(Debug, Deserialize)]
struct TopTags {
    #[serde(default)]
    tag: TagList,
}

/// Last.fm returns a bare object instead of a one-element array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagList {
    Many(Vec<LastFmTag>),
    One(LastFmTag),
}

impl Default for TagList {
    fn default() -> Self {
        TagList::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LastFmTag {
    name: String,
    #[serde(default)]
    count: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LastFmClient {
    http: ureq::Agent,
    api_key: String,
    base_url: String,
    min_tag_count: u32,
    max_tags: usize,
}

impl LastFmClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            http: http_agent(timeout),
            api_key,
            base_url: LASTFM_API_BASE.to_string(),
            min_tag_count: DEFAULT_MIN_TAG_COUNT,
            max_tags: DEFAULT_MAX_TAGS,
        }
    }

    pub fn with_limits(mut self, min_tag_count: u32, max_tags: usize) -> Self {
        self.min_tag_count = min_tag_count;
        self.max_tags = max_tags;
        self
    }

    /// Non-2xx response. Error payloads come with 4xx statuses too; without
    /// one the status itself is the failure.
    fn interpret_error_status(&self, status: u16, body: Option<Value>) -> LookupResult {
        match body {
            Some(body) if body.get("error").is_some() => self.interpret(body),
            _ => Err(LookupError::Status {
                source_name: SOURCE_NAME.to_string(),
                status,
            }),
        }
    }

    fn interpret(&self, body: Value) -> LookupResult {
        if let Some(code) = body.get("error").and_then(Value::as_i64) {
            if code == ERROR_INVALID_PARAMETERS {
                return Ok(Lookup::NotFound);
            }
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(LookupError::Api {
                source_name: SOURCE_NAME.to_string(),
                code,
                message,
            });
        }

        let response: TopTagsResponse =
            serde_json::from_value(body).map_err(|e| parse_error(SOURCE_NAME, e))?;
        let tags = match response.toptags.tag {
            TagList::Many(tags) => tags,
            TagList::One(tag) => vec![tag],
        };

        let names: Vec<String> = tags
            .into_iter()
            .filter(|t| t.count >= self.min_tag_count)
            .map(|t| t.name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .take(self.max_tags)
            .collect();

        Ok(if names.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::Found(names)
        })
    }
}

impl LookupClient for LastFmClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn scope(&self) -> QueryScope {
        QueryScope::Artist
    }

    fn resolve(&self, query: &Query) -> LookupResult {
        let response = self
            .http
            .get(&self.base_url)
            .query("method", "artist.gettoptags")
            .query("artist", &query.artist)
            .query("autocorrect", "1")
            .query("api_key", &self.api_key)
            .query("format", "json")
            .call();

        let body: Value = match response {
            Ok(response) => response.into_json().map_err(|e| parse_error(SOURCE_NAME, e))?,
            Err(ureq::Error::Status(status, response)) => {
                return self.interpret_error_status(status, response.into_json().ok());
            }
            Err(e) => return Err(transport_error(SOURCE_NAME, e)),
        };

        self.interpret(body)
    }
}
