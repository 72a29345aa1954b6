//! Host patterns for egress allow-lists.
//!
//! A pattern is a bare hostname, optionally with glob wildcards:
//! `api.example.com`, `*.example.com`. No scheme, no path, no whitespace.
//! Matching is case-insensitive.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone)]
pub struct HostPattern {
    raw: String,
    pattern: glob::Pattern,
}

impl HostPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return Err("host pattern is empty".into());
        }
        if raw.contains("://") {
            return Err(format!("'{raw}' must be a host, not a URL"));
        }
        if raw.contains('/') {
            return Err(format!("'{raw}' must not contain a path"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(format!("'{raw}' must not contain whitespace"));
        }
        let pattern =
            glob::Pattern::new(&raw).map_err(|e| format!("'{raw}' is not a valid pattern: {e}"))?;
        Ok(Self { raw, pattern })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a concrete hostname matches.
    pub fn matches(&self, host: &str) -> bool {
        self.pattern.matches(&host.to_ascii_lowercase())
    }

    /// Whether everything `other` admits is also admitted by `self`.
    ///
    /// Literal text comparison on the pattern: `*.example.com` covers
    /// `api.example.com` and `*.api.example.com`, but `api.example.com`
    /// does not cover `*.example.com`.
    pub fn covers(&self, other: &HostPattern) -> bool {
        self.raw == other.raw || self.pattern.matches(&other.raw)
    }
}

impl PartialEq for HostPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for HostPattern {}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for HostPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
