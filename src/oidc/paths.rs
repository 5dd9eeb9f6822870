//! Path classification
//!
//! Two modes, chosen by which list is configured:
//!
//! - **allow-list** (`secure` non-empty): only paths matching a `secure`
//!   entry are protected; everything else is exempt. `non_secure` is ignored
//!   in this mode, even for paths that appear in both lists.
//! - **deny-list** (`secure` empty, the default): every path is protected
//!   except those matching a `non_secure` entry.
//!
//! Matching is segment-aware prefix matching: `/admin` matches `/admin`,
//! `/admin/` and `/admin/users`, but not `/administrator`. An entry ending
//! in `/` matches anything below it. The query string is ignored.
//!
//! Paths are matched in canonical form (see [`canonical_path`]). A path
//! with no canonical form is always protected, in either mode.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

use crate::config::{PathsConfig, clean_paths};

/// Outcome of classifying a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// No session required
    Exempt,
    /// Session required
    Protected,
}

/// Classifies request paths against the configured lists
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    secure: Vec<String>,
    non_secure: Vec<String>,
}

impl PathMatcher {
    /// Build from raw lists; entries are trimmed and empty entries dropped
    pub fn new<S: AsRef<str>>(secure: &[S], non_secure: &[S]) -> Self {
        Self {
            secure: clean_paths(secure),
            non_secure: clean_paths(non_secure),
        }
    }

    /// Build from the `paths` config section
    #[must_use]
    pub fn from_config(config: &PathsConfig) -> Self {
        Self::new(&config.secure, &config.non_secure)
    }

    /// True when the secure list drives classification
    #[must_use]
    pub fn is_allow_list(&self) -> bool {
        !self.secure.is_empty()
    }

    /// Classify a request path (query string and fragment are ignored)
    #[must_use]
    pub fn classify(&self, path: &str) -> PathClass {
        let Some(path) = canonical_path(path) else {
            return PathClass::Protected;
        };
        let path = path.as_str();

        if self.is_allow_list() {
            if self.secure.iter().any(|p| prefix_matches(p, path)) {
                PathClass::Protected
            } else {
                PathClass::Exempt
            }
        } else if self.non_secure.iter().any(|p| prefix_matches(p, path)) {
            PathClass::Exempt
        } else {
            PathClass::Protected
        }
    }
}

/// Request path without its query string and fragment
#[must_use]
pub fn strip_query(path: &str) -> &str {
    path.find(['?', '#']).map_or(path, |i| &path[..i])
}

/// Canonical form of a request path, or `None` if it has none
///
/// Percent-escapes are decoded and repeated `/` collapsed. Paths that
/// upstreams may resolve differently have no canonical form: relative
/// paths, `.` and `..` segments (literal or encoded), encoded `/`, `\`,
/// `%` or NUL, and escapes that are not UTF-8.
#[must_use]
pub fn canonical_path(path: &str) -> Option<String> {
    let raw = strip_query(path);
    let rest = raw.strip_prefix('/')?;

    let mut canonical = String::with_capacity(raw.len());
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        let decoded: Cow<'_, str> = percent_decode_str(segment).decode_utf8().ok()?;
        if matches!(decoded.as_ref(), "." | "..")
            || decoded.contains(['/', '\\', '%', '\0'])
        {
            return None;
        }
        canonical.push('/');
        canonical.push_str(&decoded);
    }

    if canonical.is_empty() || raw.ends_with('/') {
        canonical.push('/');
    }
    Some(canonical)
}

fn prefix_matches(pattern: &str, path: &str) -> bool {
    match path.strip_prefix(pattern) {
        Some(rest) => rest.is_empty() || pattern.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
