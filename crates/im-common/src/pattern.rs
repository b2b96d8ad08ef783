//! Shared wildcard pattern dialect
//!
//! Tag importance, correlation rules and alarm rules all use the same glob
//! dialect: `*` matches any run of characters, `?` exactly one,
//! case-insensitive, anchored over the full string. Literal patterns (the
//! common case: a rule naming one concrete tag) compare directly and never
//! touch the glob engine; real globs are compiled once and cached.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A compiled wildcard pattern
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    raw: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    /// No glob metacharacters: case-insensitive equality against `raw`
    Literal,
    Glob(GlobMatcher),
}

/// Characters that make a pattern a real glob rather than a literal
fn has_glob_syntax(raw: &str) -> bool {
    raw.contains(['*', '?', '[', ']', '{', '}', '\\'])
}

impl WildcardPattern {
    pub fn compile(raw: &str) -> Result<Self> {
        let matcher = if has_glob_syntax(raw) {
            let glob = GlobBuilder::new(raw)
                .case_insensitive(true)
                .literal_separator(false)
                .backslash_escape(false)
                .build()
                .map_err(|e| Error::Validation(format!("invalid pattern '{raw}': {e}")))?;
            Matcher::Glob(glob.compile_matcher())
        } else {
            Matcher::Literal
        };
        Ok(WildcardPattern { raw: raw.to_string(), matcher })
    }

    /// True when the pattern took the literal fast path
    pub fn is_literal(&self) -> bool {
        matches!(self.matcher, Matcher::Literal)
    }

    pub fn is_match(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Literal => self.raw.eq_ignore_ascii_case(text),
            Matcher::Glob(matcher) => matcher.is_match(text),
        }
    }
}

/// Compile-once pattern cache shared by the matching services
#[derive(Debug, Default)]
pub struct PatternCache {
    inner: RwLock<HashMap<String, WildcardPattern>>,
}

impl PatternCache {
    pub fn new() -> Self {
        PatternCache::default()
    }

    /// Match `text` against `pattern`, compiling and caching on first use
    pub fn matches(&self, pattern: &str, text: &str) -> Result<bool> {
        if let Some(compiled) = self.inner.read().get(pattern) {
            return Ok(compiled.is_match(text));
        }
        let compiled = WildcardPattern::compile(pattern)?;
        let matched = compiled.is_match(text);
        self.inner.write().insert(pattern.to_string(), compiled);
        Ok(matched)
    }

    /// Drop every cached pattern, returning how many were held. Called when
    /// the owning rule set is refreshed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.len();
        inner.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let p = WildcardPattern::compile("pump*temp").unwrap();
        assert!(p.is_match("pump_01_temp"));
        assert!(p.is_match("pumptemp"));
        assert!(!p.is_match("pump_01_temp_raw"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        let p = WildcardPattern::compile("motor?").unwrap();
        assert!(p.is_match("motor1"));
        assert!(!p.is_match("motor12"));
        assert!(!p.is_match("motor"));
    }

    #[test]
    fn matching_is_case_insensitive_and_anchored() {
        let p = WildcardPattern::compile("Vibration_*").unwrap();
        assert!(p.is_match("vibration_x"));
        assert!(p.is_match("VIBRATION_Y"));
        assert!(!p.is_match("pre_vibration_x"));
    }

    #[test]
    fn literal_patterns_skip_the_glob_engine() {
        let p = WildcardPattern::compile("Temp_Bearing_01").unwrap();
        assert!(p.is_literal());
        assert!(p.is_match("temp_bearing_01"));
        assert!(p.is_match("TEMP_BEARING_01"));
        assert!(!p.is_match("temp_bearing_012"));

        let glob = WildcardPattern::compile("temp_*").unwrap();
        assert!(!glob.is_literal());
    }

    #[test]
    fn invalid_pattern_is_a_validation_error() {
        let err = WildcardPattern::compile("temp[").unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn cache_compiles_once_and_clear_reports_the_count() {
        let cache = PatternCache::new();
        assert!(cache.matches("t?g*", "tag_a").unwrap());
        assert!(cache.matches("t?g*", "TIG").unwrap());
        assert!(cache.matches("plain_tag", "Plain_Tag").unwrap());
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.clear(), 0);
    }
}
