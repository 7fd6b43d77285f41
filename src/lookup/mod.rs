//! External lookup services.
//!
//! The pipeline only sees [`LookupClient`]: a query goes in, a definitive
//! [`Lookup`] or a [`LookupError`] comes out. Errors are per-row and never
//! stop a batch.

use std::time::Duration;
use thiserror::Error;

pub use crate::models::{Lookup, Query, QueryScope};

pub mod lastfm;
pub mod lrclib;
pub mod spotify;

pub use lastfm::LastFmClient;
pub use lrclib::LrclibClient;
pub use spotify::{SpotifyClient, SpotifyField};

/// Identifies this tool to lookup services.
pub const USER_AGENT: &str = concat!("music-enrich/", env!("CARGO_PKG_VERSION"));

/// Failure of a single lookup call.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{source_name}: request failed: {message}")]
    Http { source_name: String, message: String },

    #[error("{source_name}: HTTP {status}")]
    Status { source_name: String, status: u16 },

    #[error("{source_name}: unexpected response: {message}")]
    Parse { source_name: String, message: String },

    #[error("{source_name}: API error {code}: {message}")]
    Api {
        source_name: String,
        code: i64,
        message: String,
    },
}

pub type LookupResult = Result<Lookup, LookupError>;

/// A pluggable external lookup. Implementations are shared by the lookup
/// workers of a batch, hence `Send + Sync`.
pub trait LookupClient: Send + Sync {
    /// Short service name for logs.
    fn source_name(&self) -> &str;

    /// Which part of a query identifies the entity; decides cache keys.
    fn scope(&self) -> QueryScope;

    fn resolve(&self, query: &Query) -> LookupResult;
}

/// HTTP agent with connect/read timeouts so a hung call cannot stall the run.
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5).min(timeout))
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(USER_AGENT)
        .build()
}

pub(crate) fn transport_error(source_name: &str, error: ureq::Error) -> LookupError {
    match error {
        ureq::Error::Status(status, _) => LookupError::Status {
            source_name: source_name.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => LookupError::Http {
            source_name: source_name.to_string(),
            message: transport.to_string(),
        },
    }
}

pub(crate) fn parse_error(source_name: &str, error: impl std::fmt::Display) -> LookupError {
    LookupError::Parse {
        source_name: source_name.to_string(),
        message: error.to_string(),
    }
}

/// One-shot local HTTP server for exercising clients against canned
/// responses.
#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answer the first request on a fresh local port with `status_line` and
    /// a JSON `body`. Returns `http://127.0.0.1:<port>/api`.
    pub fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/api", addr)
    }
}
