//! Request path globs shared by tenant paths and HTTP permissions

use std::cmp::Ordering;

use globset::{GlobBuilder, GlobMatcher};

/// A compiled path glob
///
/// A trailing `/*` covers the base path itself and everything below it, so
/// `/api/*` matches `/api`, `/api/a` and `/api/a/b`. Any other `*` stays
/// within one path segment.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    matchers: Vec<GlobMatcher>,
    /// Exact paths outrank wildcards, then longer literal prefixes win
    specificity: (bool, usize),
}

impl PathPattern {
    pub fn compile(pattern: &str) -> std::result::Result<Self, globset::Error> {
        let globs = match pattern.strip_suffix("/*") {
            Some(base) if !base.is_empty() => vec![base.to_string(), format!("{}/**", base)],
            _ => vec![pattern.to_string()],
        };

        let matchers = globs
            .iter()
            .map(|glob| {
                GlobBuilder::new(glob)
                    .literal_separator(true)
                    .build()
                    .map(|g| g.compile_matcher())
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let literal_len = pattern
            .find(|c| matches!(c, '*' | '?' | '[' | '{'))
            .unwrap_or(pattern.len());

        Ok(Self {
            pattern: pattern.to_string(),
            matchers,
            specificity: (literal_len == pattern.len(), literal_len),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(path))
    }

    /// Orders more specific patterns first
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        other.specificity.cmp(&self.specificity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_wildcard_covers_base_and_descendants() {
        let pattern = PathPattern::compile("/api/*").unwrap();
        assert!(pattern.is_match("/api"));
        assert!(pattern.is_match("/api/a"));
        assert!(pattern.is_match("/api/a/b"));
        assert!(!pattern.is_match("/apiary"));
    }

    #[test]
    fn inner_wildcard_stays_in_segment() {
        let pattern = PathPattern::compile("/tenant/*/info").unwrap();
        assert!(pattern.is_match("/tenant/a/info"));
        assert!(!pattern.is_match("/tenant/a/b/info"));
    }

    #[test]
    fn exact_and_longer_patterns_sort_first() {
        let mut patterns = vec![
            PathPattern::compile("/api/*").unwrap(),
            PathPattern::compile("/api/public/*").unwrap(),
            PathPattern::compile("/api/public/info").unwrap(),
        ];
        patterns.sort_by(|a, b| a.cmp_specificity(b));
        let order: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
        assert_eq!(order, vec!["/api/public/info", "/api/public/*", "/api/*"]);
    }
}
