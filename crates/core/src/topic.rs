//! Topic taxonomy: event type validation, subscription patterns and the
//! allow-list of taxonomy prefixes clients may subscribe to.
//!
//! Event types are dot-delimited, e.g. `deal.stage.updated`. A pattern is
//! either an exact event type or an exact prefix followed by a single
//! trailing wildcard segment, e.g. `deal.stage.*`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Segment separator in event types and patterns.
pub const SEPARATOR: char = '.';

/// Trailing wildcard suffix of a pattern.
pub const WILDCARD_SUFFIX: &str = ".*";

/// Maximum length of an event type or pattern, in bytes.
pub const MAX_TOPIC_LEN: usize = 255;

/// Returns `true` when `pattern` matches `event_type`.
///
/// A pattern matches when it is identical to the event type, or when it ends
/// with `.*` and the event type either equals the stripped prefix or starts
/// with the stripped prefix followed by `.`.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    if pattern == event_type {
        return true;
    }
    match pattern.strip_suffix(WILDCARD_SUFFIX) {
        Some(prefix) => {
            event_type == prefix
                || (event_type.len() > prefix.len()
                    && event_type.starts_with(prefix)
                    && event_type.as_bytes()[prefix.len()] == b'.')
        }
        None => false,
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Validate a concrete (non-wildcard) event type such as `deal.stage.updated`.
pub fn validate_event_type(event_type: &str) -> Result<(), CoreError> {
    if event_type.is_empty() {
        return Err(CoreError::Validation("event_type is required".into()));
    }
    if event_type.len() > MAX_TOPIC_LEN {
        return Err(CoreError::Validation(format!(
            "event_type exceeds {MAX_TOPIC_LEN} bytes"
        )));
    }
    if !event_type.split(SEPARATOR).all(is_valid_segment) {
        return Err(CoreError::Validation(format!(
            "Malformed event_type '{event_type}': expected dot-separated lower-case segments"
        )));
    }
    Ok(())
}

/// A syntactically valid subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern(String);

impl TopicPattern {
    /// Parse a raw pattern, checking syntax only (not the allow-list).
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::Validation("Topic pattern must not be empty".into()));
        }
        if raw.len() > MAX_TOPIC_LEN {
            return Err(CoreError::Validation(format!(
                "Topic pattern exceeds {MAX_TOPIC_LEN} bytes"
            )));
        }

        let literal = raw.strip_suffix(WILDCARD_SUFFIX).unwrap_or(raw);
        if !literal.split(SEPARATOR).all(is_valid_segment) {
            return Err(CoreError::Validation(format!(
                "Malformed topic pattern '{raw}': only a single trailing '.*' wildcard is allowed"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern ends with the trailing wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with(WILDCARD_SUFFIX)
    }

    /// The pattern without its wildcard suffix.
    pub fn literal(&self) -> &str {
        self.0.strip_suffix(WILDCARD_SUFFIX).unwrap_or(&self.0)
    }

    pub fn matches(&self, event_type: &str) -> bool {
        matches(&self.0, event_type)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(value: TopicPattern) -> Self {
        value.0
    }
}

/// Allow-list of taxonomy prefixes clients may subscribe under.
///
/// A pattern is allowed when its literal part equals an allowed prefix or
/// lies beneath one (`deal.stage.*` is allowed by `deal`).
#[derive(Debug, Clone)]
pub struct TopicAllowList {
    prefixes: Vec<String>,
}

/// Prefixes allowed when no explicit list is configured.
pub const DEFAULT_TOPIC_PREFIXES: &[&str] = &[
    "account", "contact", "lead", "deal", "activity", "task", "note", "timeline", "pipeline",
];

impl TopicAllowList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn allows(&self, literal: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            literal == prefix
                || (literal.starts_with(prefix.as_str())
                    && literal.as_bytes().get(prefix.len()) == Some(&b'.'))
        })
    }

    /// Parse and check a single pattern against the allow-list.
    pub fn validate(&self, raw: &str) -> Result<TopicPattern, CoreError> {
        let pattern = TopicPattern::parse(raw)?;
        if !self.allows(pattern.literal()) {
            return Err(CoreError::Validation(format!(
                "Topic pattern '{pattern}' is not under an allowed prefix"
            )));
        }
        Ok(pattern)
    }

    /// Validate every pattern; fails on the first invalid one so callers can
    /// apply a set of patterns all-or-nothing.
    pub fn validate_all<S: AsRef<str>>(&self, raws: &[S]) -> Result<Vec<TopicPattern>, CoreError> {
        if raws.is_empty() {
            return Err(CoreError::Validation("At least one topic is required".into()));
        }
        let mut patterns = Vec::with_capacity(raws.len());
        for raw in raws {
            let pattern = self.validate(raw.as_ref())?;
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Ok(patterns)
    }

    /// Split a comma-separated topic list (as sent by long-poll clients) and
    /// validate each entry.
    pub fn validate_csv(&self, csv: &str) -> Result<Vec<TopicPattern>, CoreError> {
        let raws: Vec<&str> = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        self.validate_all(&raws)
    }
}

impl Default for TopicAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIXES.iter().copied())
    }
}
