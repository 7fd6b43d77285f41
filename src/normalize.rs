//! Name normalization for cache keys and lookup candidate matching.
//!
//! Cache keys default to the plain `trim + lowercase` form so existing cache
//! files keep working; folded keys additionally strip diacritics, featured
//! artists and a leading "the".

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::{Query, QueryScope};

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Title suffixes that do not change which song it is.
static TITLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "- Remastered 2011", "(2009 Remaster)"
        Regex::new(r"(?i)\s*[-–—/]\s*(?:\d{4}\s+)?remaster(?:ed)?(?:\s+\d{4})?.*$").unwrap(),
        Regex::new(r"(?i)\s*[\(\[](?:\d{4}\s+)?remaster(?:ed)?(?:\s+\d{4})?[\)\]]").unwrap(),
        // "(feat. X)", "[ft. Y]"
        Regex::new(r"(?i)\s*[\(\[](?:feat\.?|ft\.?|featuring|with)\s+[^)\]]+[\)\]]").unwrap(),
        // "- Radio Edit", "(Single Version)", "(Live)", "(Acoustic)"
        Regex::new(r"(?i)\s*[-–—]\s*(?:radio\s+edit|single\s+version|album\s+version|live|acoustic(?:\s+version)?)\s*$").unwrap(),
        Regex::new(r"(?i)\s*[\(\[](?:radio\s+edit|single\s+version|album\s+version|live|acoustic|mono|stereo|explicit|clean)[\)\]]").unwrap(),
        // "Song feat. Artist" without brackets
        Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.+$").unwrap(),
    ]
});

/// Artist credits beyond the primary one.
static ARTIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\s*[\(\[](?:feat\.?|ft\.?|featuring)\s+[^)\]]+[\)\]]").unwrap(),
        Regex::new(r"(?i),?\s+(?:feat\.?|ft\.?|featuring)\s+.*$").unwrap(),
    ]
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// ============================================================================
// FOLDING
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII: NFKD, drop combining marks, then
/// transliterate whatever is left. "Beyoncé" → "beyonce".
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Straighten curly quotes, spell out "&" and collapse runs of spaces.
pub fn normalize_punctuation(s: &str) -> String {
    let result = s
        .replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(" & ", " and ");
    MULTI_SPACE.replace_all(&result, " ").to_string()
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Normalize a track title for comparison.
pub fn normalize_title(title: &str) -> String {
    let mut result = normalize_punctuation(title);
    for pattern in TITLE_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").to_string();
    }
    fold_to_ascii(&result).trim().to_string()
}

/// Normalize an artist name for comparison.
/// "The Weeknd feat. Daft Punk" → "weeknd".
pub fn normalize_artist(artist: &str) -> String {
    let mut result = normalize_punctuation(artist);
    for pattern in ARTIST_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").to_string();
    }
    let mut normalized = fold_to_ascii(&result).trim().to_string();

    if let Some(rest) = normalized.strip_prefix("the ") {
        normalized = rest.to_string();
    }
    if let Some(rest) = normalized.strip_suffix(", the") {
        normalized = rest.to_string();
    }
    normalized
}

/// Plain key form: trimmed and lowercased.
pub fn simple_key(s: &str) -> String {
    s.trim().to_lowercase()
}

// ============================================================================
// CACHE KEYS
// ============================================================================

/// How lookup keys are normalized before they hit the entity cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyStyle {
    /// `trim + lowercase`, compatible with existing cache files.
    #[default]
    Lowercase,
    /// ASCII folding plus artist/title cleanup; merges spelling variants.
    Folded,
}

/// Cache key for a query. Artist-scoped lookups key on the artist only;
/// track-scoped ones on artist and title separated by a tab.
pub fn cache_key(query: &Query, scope: QueryScope, style: KeyStyle) -> String {
    let (artist, title) = match style {
        KeyStyle::Lowercase => (simple_key(&query.artist), simple_key(&query.title)),
        KeyStyle::Folded => (normalize_artist(&query.artist), normalize_title(&query.title)),
    };
    match scope {
        QueryScope::Artist => artist,
        QueryScope::Track => format!("{artist}\t{title}"),
    }
}
