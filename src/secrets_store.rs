//! Flat `KEY='value'` secrets file with merge-on-write semantics
//!
//! The installer and several sibling containers read this file, so the
//! format stays line-oriented. Writes preserve unrelated keys, quote
//! values, and go through the restricted atomic-write primitive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{HubError, HubResult};
use crate::file_store;

pub struct SecretsStore {
    path: PathBuf,
}

impl SecretsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parse the secrets file into an ordered key/value map. A missing
    /// file is an empty store.
    pub fn load(&self) -> HubResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| HubError::io(format!("reading {}", self.path.display()), e))?;

        let mut entries = BTreeMap::new();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('\'').trim_matches('"');
                entries.insert(key.trim().to_string(), value.to_string());
            }
        }
        Ok(entries)
    }

    /// Merge `updates` into the file, preserving every unrelated key.
    pub fn merge(&self, updates: &BTreeMap<String, String>) -> HubResult<()> {
        let mut entries = self.load()?;
        for (key, value) in updates {
            entries.insert(key.clone(), value.clone());
        }
        let mut text = String::new();
        for (key, value) in &entries {
            text.push_str(&format!("{key}='{value}'\n"));
        }
        file_store::write_text_restricted(&self.path, &text)
    }

    /// Shorthand for a single-key update.
    pub fn set(&self, key: &str, value: &str) -> HubResult<()> {
        let mut updates = BTreeMap::new();
        updates.insert(key.to_string(), value.to_string());
        self.merge(&updates)
    }

    pub fn get(&self, key: &str) -> HubResult<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secrets");
        std::fs::write(&path, "DESEC_TOKEN='abc'\nWG_HOST='vpn.example'\n").unwrap();

        let store = SecretsStore::new(&path);
        store.set("HUB_API_KEY", "newkey123").unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.get("DESEC_TOKEN").map(String::as_str), Some("abc"));
        assert_eq!(entries.get("WG_HOST").map(String::as_str), Some("vpn.example"));
        assert_eq!(entries.get("HUB_API_KEY").map(String::as_str), Some("newkey123"));
    }

    #[test]
    fn values_are_quoted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secrets");
        let store = SecretsStore::new(&path);
        store.set("UPDATE_STRATEGY", "stable").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("UPDATE_STRATEGY='stable'"));
    }

    #[test]
    fn loads_double_quoted_legacy_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secrets");
        std::fs::write(&path, "ODIDO_TOKEN=\"legacy\"\n").unwrap();
        let store = SecretsStore::new(&path);
        assert_eq!(store.get("ODIDO_TOKEN").unwrap().as_deref(), Some("legacy"));
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::new(dir.path().join(".secrets"));
        assert!(store.load().unwrap().is_empty());
    }
}
