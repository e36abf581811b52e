//! Typed view over `"Key: value"` observation strings.
//!
//! Storage keeps observations as plain strings. Consumers parse them by prefix with a
//! case-insensitive key match; an observation that does not follow the convention is not an
//! error, it simply has no key.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const URL: &str = "URL";
pub const TIMESTAMP: &str = "Timestamp";
pub const PASS: &str = "Pass";
pub const EXPLANATION: &str = "Explanation";
pub const SUMMARY: &str = "Summary";
pub const SOURCE_SNAPSHOT_ID: &str = "Source snapshot ID";
pub const TARGET_SNAPSHOT_ID: &str = "Target snapshot ID";
pub const THOUGHT: &str = "Thought";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub key: String,
    pub value: String,
}

impl Observation {
    pub fn new<K: Into<String>, V: ToString>(key: K, value: V) -> Observation {
        Observation {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Split on the first `:`. Returns `None` for strings without a separator or with an empty
    /// key.
    pub fn parse(raw: &str) -> Option<Observation> {
        let (key, value) = raw.split_once(':')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Observation {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

impl Display for Observation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

impl From<Observation> for String {
    fn from(obs: Observation) -> String {
        obs.to_string()
    }
}

/// Value of the first observation whose key matches `key` case-insensitively.
pub fn find_value<'a, I, S>(observations: I, key: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a + ?Sized,
{
    observations
        .into_iter()
        .filter_map(|raw| Observation::parse(raw.as_ref()))
        .find(|obs| obs.has_key(key))
        .map(|obs| obs.value)
}

/// Like [`find_value`], defaulting to the empty string.
pub fn value_or_empty<'a, I, S>(observations: I, key: &str) -> String
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a + ?Sized,
{
    find_value(observations, key).unwrap_or_default()
}

/// The `Timestamp:` value, or empty when absent.
pub fn timestamp_of(observations: &[String]) -> String {
    value_or_empty(observations, TIMESTAMP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_colon_only() {
        let obs = Observation::parse("Timestamp: 2024-01-01T00:00:00Z").unwrap();
        assert_eq!(obs.key, "Timestamp");
        assert_eq!(obs.value, "2024-01-01T00:00:00Z");
        assert_eq!(obs.to_string(), "Timestamp: 2024-01-01T00:00:00Z");
    }

    #[test]
    fn malformed_observations_have_no_key() {
        assert_eq!(Observation::parse("no separator here"), None);
        assert_eq!(Observation::parse(": orphan value"), None);
    }

    #[test]
    fn key_lookup_is_case_insensitive_and_first_wins() {
        let obs = vec![
            "noise".to_string(),
            "pass: true".to_string(),
            "PASS: false".to_string(),
        ];
        assert_eq!(find_value(&obs, PASS).as_deref(), Some("true"));
        assert_eq!(value_or_empty(&obs, EXPLANATION), "");
    }

    #[test]
    fn multi_word_keys_match() {
        let obs = vec!["source snapshot id: abc".to_string()];
        assert_eq!(value_or_empty(&obs, SOURCE_SNAPSHOT_ID), "abc");
    }
}
