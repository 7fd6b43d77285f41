//! Scoring for search-style lookups.
//!
//! A search returns several candidate tracks; the lookup keeps the best one
//! only if it scores at or above [`ACCEPT_THRESHOLD`]. Scores combine title
//! agreement, artist similarity and duration closeness, with hard rejects
//! for clear mismatches.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::models::Query;
use crate::normalize::{normalize_artist, normalize_title};

// ============================================================================
// Score Thresholds
// ============================================================================

/// Minimum score to accept a candidate
pub const ACCEPT_THRESHOLD: i32 = 80;

/// Returned for candidates that must never be accepted.
pub const REJECT: i32 = -1000;

// ============================================================================
// Regex Patterns
// ============================================================================

/// Versions that usually carry different lyrics or none at all.
static VARIANT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\blive\b").unwrap(),
        Regex::new(r"(?i)\bremix(?:ed)?\b").unwrap(),
        Regex::new(r"(?i)\bkaraoke\b").unwrap(),
        Regex::new(r"(?i)\binstrumental\b").unwrap(),
        Regex::new(r"(?i)\bcover\b").unwrap(),
    ]
});

pub fn has_variant_pattern(text: &str) -> bool {
    VARIANT_PATTERNS.iter().any(|p| p.is_match(text))
}

// ============================================================================
// Similarity
// ============================================================================

/// Similarity between two normalized artist names (0.0 to 1.0).
/// Best of token Jaccard (word order, extra credits) and Jaro-Winkler
/// (spelling variants).
pub fn compute_artist_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let tokens_a: FxHashSet<&str> = a.split_whitespace().collect();
    let tokens_b: FxHashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    let jaccard = intersection as f64 / union as f64;

    jaccard.max(strsim::jaro_winkler(a, b))
}

/// Title agreement on normalized titles.
pub fn title_score(query_norm: &str, candidate_norm: &str) -> i32 {
    if query_norm == candidate_norm {
        return 50;
    }
    let similarity = strsim::normalized_levenshtein(query_norm, candidate_norm);
    if similarity >= 0.9 {
        30
    } else if similarity >= 0.75 {
        10
    } else {
        REJECT
    }
}

// ============================================================================
// Duration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

/// Largest duration difference (seconds) tolerated at a confidence level.
pub fn max_duration_tolerance(confidence: MatchConfidence) -> i64 {
    match confidence {
        MatchConfidence::High => 60,
        MatchConfidence::Medium => 30,
        MatchConfidence::Low => 10,
    }
}

/// Graduated duration score for a difference in seconds.
pub fn duration_score(diff_sec: i64) -> i32 {
    match diff_sec.abs() {
        0..=2 => 30,
        3..=5 => 20,
        6..=10 => 10,
        11..=30 => 5,
        _ => 0,
    }
}

// ============================================================================
// Combined Scoring
// ============================================================================

/// A track returned by a search endpoint.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub duration_sec: Option<f64>,
}

/// Score a candidate against the query. Anything below
/// [`ACCEPT_THRESHOLD`] must be treated as not found.
pub fn candidate_score(query: &Query, candidate: &Candidate<'_>) -> i32 {
    let title = title_score(&normalize_title(&query.title), &normalize_title(candidate.title));
    if title == REJECT {
        return REJECT;
    }

    let artist_similarity = compute_artist_similarity(
        &normalize_artist(&query.artist),
        &normalize_artist(candidate.artist),
    );
    if artist_similarity < 0.6 {
        return REJECT;
    }

    let confidence = if artist_similarity >= 0.999 && title == 50 {
        MatchConfidence::High
    } else if artist_similarity >= 0.85 {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    };

    let mut score = title;
    score += if artist_similarity >= 0.999 {
        50
    } else {
        (artist_similarity * 35.0) as i32
    };

    if let (Some(query_ms), Some(candidate_sec)) = (query.duration_ms, candidate.duration_sec) {
        let query_sec = (query_ms as f64 / 1000.0).round() as i64;
        let diff = (query_sec - candidate_sec.round() as i64).abs();
        if diff > max_duration_tolerance(confidence) {
            return REJECT;
        }
        score += duration_score(diff);
    }

    // Only penalize variants the query did not ask for.
    if has_variant_pattern(candidate.title) && !has_variant_pattern(&query.title) {
        score -= 40;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(artist: &str, title: &str, duration_ms: Option<i64>) -> Query {
        Query {
            artist: artist.into(),
            title: title.into(),
            duration_ms,
        }
    }

    #[test]
    fn test_artist_similarity() {
        assert_eq!(compute_artist_similarity("adele", "adele"), 1.0);
        assert!(compute_artist_similarity("simon and garfunkel", "garfunkel and simon") > 0.99);
        assert!(compute_artist_similarity("beyonce", "metallica") < 0.6);
        assert_eq!(compute_artist_similarity("", "adele"), 0.0);
    }

    #[test]
    fn test_exact_match_accepted_without_duration() {
        let q = query("Adele", "Hello", None);
        let c = Candidate { title: "Hello", artist: "Adele", duration_sec: None };
        assert!(candidate_score(&q, &c) >= ACCEPT_THRESHOLD);
    }

    #[test]
    fn test_remaster_suffix_still_exact() {
        let q = query("The Beatles", "Let It Be - Remastered 2009", Some(243_000));
        let c = Candidate { title: "Let It Be", artist: "Beatles", duration_sec: Some(243.0) };
        assert_eq!(candidate_score(&q, &c), 130);
    }

    #[test]
    fn test_duration_sides_rounded_alike() {
        // 212.7s rounds to 213, two seconds from the candidate.
        let q = query("Adele", "Hello", Some(212_700));
        let c = Candidate { title: "Hello", artist: "Adele", duration_sec: Some(215.0) };
        assert_eq!(candidate_score(&q, &c), 130);
    }

    #[test]
    fn test_wrong_artist_rejected() {
        let q = query("Adele", "Hello", None);
        let c = Candidate { title: "Hello", artist: "Lionel Richie", duration_sec: None };
        assert_eq!(candidate_score(&q, &c), REJECT);
    }

    #[test]
    fn test_duration_outside_tolerance_rejected() {
        let q = query("Adele", "Hello", Some(295_000));
        let c = Candidate { title: "Hello", artist: "Adele", duration_sec: Some(400.0) };
        assert_eq!(candidate_score(&q, &c), REJECT);
    }

    #[test]
    fn test_live_variant_penalized() {
        let q = query("Adele", "Hello", None);
        let studio = Candidate { title: "Hello", artist: "Adele", duration_sec: None };
        let live = Candidate { title: "Hello (Live at the BBC)", artist: "Adele", duration_sec: None };
        assert!(candidate_score(&q, &studio) > candidate_score(&q, &live));
    }
}
