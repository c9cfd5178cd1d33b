//! Service catalog and theme document
//!
//! `services.json` is advisory read-only metadata maintained alongside the
//! compose file. It is reloaded on every read so edits take effect without
//! a restart. `theme.json` carries dashboard preferences plus a handful of
//! operational overrides (session timeout, update strategy).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::file_store;
use crate::input_validator::sanitize_strategy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceEntry {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_strategies: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: BTreeMap<String, ServiceEntry>,
}

impl ServiceCatalog {
    /// Read the catalog from disk. A missing or invalid file yields an
    /// empty catalog with a warning; the catalog never blocks operations.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let raw: Value = match file_store::read_json(path) {
            Ok(v) => v,
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid service catalog, treating as empty");
                return Self::default();
            }
        };
        Self::from_value(raw).unwrap_or_else(|| {
            warn!(path = %path.display(), "service catalog is not an object, treating as empty");
            Self::default()
        })
    }

    // Accepts both the bare mapping and the {"services": {...}} wrapper.
    fn from_value(raw: Value) -> Option<Self> {
        let obj = match raw {
            Value::Object(mut top) => match top.remove("services") {
                Some(Value::Object(inner)) => inner,
                Some(_) => return None,
                None => top,
            },
            _ => return None,
        };
        let mut services = BTreeMap::new();
        for (name, value) in obj {
            match serde_json::from_value::<ServiceEntry>(value) {
                Ok(entry) => {
                    services.insert(name, entry);
                }
                Err(err) => {
                    warn!(service = %name, %err, "skipping malformed catalog entry");
                }
            }
        }
        Some(Self { services })
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    pub fn services(&self) -> &BTreeMap<String, ServiceEntry> {
        &self.services
    }

    pub fn to_document(&self) -> Value {
        serde_json::json!({ "services": self.services })
    }
}

/// Resolve the strategy to use for one service: the configured base
/// strategy, overridden by `theme.json`, then constrained by the
/// service's `allowed_strategies` list.
pub fn resolve_strategy(base: &str, theme: &Value, entry: Option<&ServiceEntry>) -> String {
    let mut strategy = match theme.get("update_strategy").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => sanitize_strategy(s),
        _ => sanitize_strategy(base),
    };
    if let Some(entry) = entry {
        if !entry.allowed_strategies.is_empty() && !entry.allowed_strategies.contains(&strategy) {
            strategy = entry.allowed_strategies[0].clone();
        }
    }
    strategy
}

/// Load the theme document; a missing or malformed file is an empty object.
pub fn load_theme(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Default::default());
    }
    match file_store::read_json(path) {
        Ok(Value::Object(obj)) => Value::Object(obj),
        Ok(_) => {
            warn!(path = %path.display(), "theme document is not an object, ignoring");
            Value::Object(Default::default())
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable theme document, ignoring");
            Value::Object(Default::default())
        }
    }
}

/// Session timeout in seconds from the theme's `session_timeout`
/// (minutes), when present and positive.
pub fn theme_session_timeout_secs(theme: &Value) -> Option<u64> {
    let minutes = theme.get("session_timeout")?.as_u64()?;
    if minutes == 0 {
        return None;
    }
    Some(minutes * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_catalog(dir: &tempfile::TempDir, value: &Value) -> std::path::PathBuf {
        let path = dir.path().join("services.json");
        std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn loads_bare_and_wrapped_forms() {
        let dir = tempfile::tempdir().unwrap();
        let bare = write_catalog(
            &dir,
            &json!({"redlib": {"allowed_strategies": ["latest"]}}),
        );
        let catalog = ServiceCatalog::load(&bare);
        assert!(catalog.get("redlib").is_some());

        let wrapped = write_catalog(
            &dir,
            &json!({"services": {"wikiless": {"repo": "https://example.org/w.git"}}}),
        );
        let catalog = ServiceCatalog::load(&wrapped);
        assert_eq!(
            catalog.get("wikiless").unwrap().repo.as_deref(),
            Some("https://example.org/w.git")
        );
    }

    #[test]
    fn invalid_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(ServiceCatalog::load(&path).services().is_empty());
        assert!(ServiceCatalog::load(&dir.path().join("missing.json"))
            .services()
            .is_empty());
    }

    #[test]
    fn theme_overrides_base_strategy() {
        let theme = json!({"update_strategy": "latest"});
        assert_eq!(resolve_strategy("stable", &theme, None), "latest");
        let no_theme = json!({});
        assert_eq!(resolve_strategy("stable", &no_theme, None), "stable");
    }

    #[test]
    fn disallowed_strategy_falls_back_to_first_allowed() {
        let entry = ServiceEntry {
            allowed_strategies: vec!["latest".into()],
            ..Default::default()
        };
        let theme = json!({});
        assert_eq!(resolve_strategy("stable", &theme, Some(&entry)), "latest");
    }

    #[test]
    fn session_timeout_is_minutes() {
        assert_eq!(
            theme_session_timeout_secs(&json!({"session_timeout": 45})),
            Some(2700)
        );
        assert_eq!(theme_session_timeout_secs(&json!({"session_timeout": 0})), None);
        assert_eq!(theme_session_timeout_secs(&json!({})), None);
    }
}
