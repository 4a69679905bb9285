//! Shell-glob matching for post names and artifact file names.
//!
//! Patterns follow shell semantics (`*`, `?`, `[...]`) via the `glob` crate.
//! Matching is case-sensitive, like the file systems the harness usually runs on.

use glob::{MatchOptions, Pattern, PatternError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    pattern: Pattern,
}

impl Glob {
    pub fn new(source: &str) -> Result<Self, PatternError> {
        Ok(Self {
            source: source.to_string(),
            pattern: Pattern::new(source)?,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.pattern.matches_with(candidate, MATCH_OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
