//! Key-value metadata attached to stored objects.
//!
//! Keys follow HTTP header semantics: they are case-insensitive and kept in
//! ASCII lowercase, so `Content-Type` and `content-type` name the same entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key holding the MIME type of the stored content.
pub const CONTENT_TYPE: &str = "content-type";

/// Key holding the file name the caller uploaded under.
pub const ORIGINAL_NAME: &str = "original-name";

/// String-to-string metadata map with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value, returning the previous one.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(normalize_key(key.as_ref()), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Right-biased merge: keys in `update` overwrite, all other keys of
    /// `self` are kept untouched.
    pub fn merged(&self, update: &Metadata) -> Metadata {
        let mut out = self.clone();
        out.extend_from(update);
        out
    }

    /// In-place form of [`Metadata::merged`].
    pub fn extend_from(&mut self, update: &Metadata) {
        for (key, value) in update.iter() {
            self.0.insert(key.to_string(), value.to_string());
        }
    }

    /// Reject entries a remote store could not carry as headers.
    ///
    /// Keys must be non-empty and made of ASCII alphanumerics, `-` or `_`.
    /// Values may not contain control characters.
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in self.iter() {
            if key.is_empty() {
                return Err("metadata keys must not be empty".into());
            }
            if !key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(format!(
                    "metadata key `{}` may only contain letters, digits, `-` and `_`",
                    key
                ));
            }
            if value.chars().any(char::is_control) {
                return Err(format!(
                    "metadata value for `{}` contains control characters",
                    key
                ));
            }
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(meta: Metadata) -> Self {
        meta.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = Metadata::new();
        for (key, value) in iter {
            meta.insert(key, value);
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut meta = Metadata::new();
        meta.insert("Content-Type", "text/plain");
        assert_eq!(meta.get("content-type"), Some("text/plain"));
        assert_eq!(meta.get("CONTENT-TYPE"), Some("text/plain"));

        meta.insert("content-TYPE", "application/json");
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("Content-Type"), Some("application/json"));
    }

    #[test]
    fn merge_overwrites_matching_and_keeps_the_rest() {
        let base: Metadata = [("a", "1"), ("b", "1")].into_iter().collect();
        let update: Metadata = [("A", "2"), ("c", "3")].into_iter().collect();

        let merged = base.merged(&update);
        assert_eq!(merged.get("a"), Some("2"));
        assert_eq!(merged.get("b"), Some("1"));
        assert_eq!(merged.get("c"), Some("3"));
        assert_eq!(merged.len(), 3);
        // the receiver is left alone
        assert_eq!(base.get("a"), Some("1"));
    }

    #[test]
    fn validate_rejects_bad_keys_and_values() {
        let ok: Metadata = [("x-author_id", "Jane Doe")].into_iter().collect();
        assert!(ok.validate().is_ok());

        let spaced: Metadata = [("bad key", "v")].into_iter().collect();
        assert!(spaced.validate().is_err());

        let empty: Metadata = [("", "v")].into_iter().collect();
        assert!(empty.validate().is_err());

        let control: Metadata = [("k", "line\nbreak")].into_iter().collect();
        assert!(control.validate().is_err());
    }

    #[test]
    fn deserializes_with_normalized_keys() {
        let meta: Metadata = serde_json::from_str(r#"{"Original-Name":"a.txt"}"#).unwrap();
        assert_eq!(meta.get(ORIGINAL_NAME), Some("a.txt"));
        assert_eq!(
            serde_json::to_string(&meta).unwrap(),
            r#"{"original-name":"a.txt"}"#
        );
    }
}
