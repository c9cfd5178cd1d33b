//! Session authentication state machine
//!
//! One `SessionManager` owns the token table and the global cleanup flag.
//! Tokens are 48 hex characters from 24 CSPRNG bytes with a sliding
//! expiry window; the table is mirrored to `sessions.json` so sessions
//! survive a restart. The static API key sits beside it in a `RwLock` so
//! rotation takes effect immediately.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::HubConfig;
use crate::errors::{HubError, HubResult};
use crate::file_store;
use crate::input_validator::sanitize_api_key;
use crate::secrets_store::SecretsStore;

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;
pub const SWEEP_INTERVAL_SECS: u64 = 60;
const TOKEN_BYTES: usize = 24;
const API_KEY_SECRET: &str = "HUB_API_KEY";

/// Result of a successful password verification.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub cleanup_enabled: bool,
}

#[derive(Debug, Default)]
struct SessionTable {
    /// token -> expiry, unix seconds
    sessions: BTreeMap<String, u64>,
    cleanup_enabled: bool,
}

pub struct SessionManager {
    table: Mutex<SessionTable>,
    api_key: RwLock<Option<String>>,
    admin_password: Option<String>,
    sessions_file: PathBuf,
    theme_file: PathBuf,
    secrets: SecretsStore,
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// Compare through fixed-size digests so the comparison time does not
// depend on where the strings diverge.
fn digest_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

impl SessionManager {
    pub fn new(config: &HubConfig) -> Self {
        let mut table = SessionTable {
            sessions: BTreeMap::new(),
            cleanup_enabled: true,
        };
        let sessions_file = config.sessions_file();
        if sessions_file.exists() {
            match file_store::read_json::<BTreeMap<String, u64>>(&sessions_file) {
                Ok(stored) => {
                    let now = now_secs();
                    table.sessions = stored.into_iter().filter(|(_, exp)| *exp > now).collect();
                    debug!(count = table.sessions.len(), "restored sessions");
                }
                Err(err) => {
                    warn!(%err, "unreadable session table, starting empty");
                }
            }
        }
        Self {
            table: Mutex::new(table),
            api_key: RwLock::new(config.hub_api_key.clone()),
            admin_password: config.admin_password.clone(),
            sessions_file,
            theme_file: config.theme_file(),
            secrets: SecretsStore::new(config.secrets_file()),
        }
    }

    /// Current timeout: theme `session_timeout` (minutes) when set,
    /// otherwise 30 minutes.
    fn timeout_secs(&self) -> u64 {
        let theme = catalog::load_theme(&self.theme_file);
        catalog::theme_session_timeout_secs(&theme).unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS)
    }

    fn lock(&self) -> HubResult<std::sync::MutexGuard<'_, SessionTable>> {
        self.table.lock().map_err(|_| HubError::MutexPoisoned {
            resource: "session table".into(),
        })
    }

    fn persist(&self, snapshot: &BTreeMap<String, u64>) -> HubResult<()> {
        file_store::write_json_restricted(&self.sessions_file, snapshot)
    }

    /// Check the admin password and issue a session token on success.
    pub fn verify_password(&self, candidate: &str) -> HubResult<IssuedSession> {
        let expected = self
            .admin_password
            .as_deref()
            .ok_or_else(|| HubError::auth("admin password not configured"))?;
        if !digest_eq(candidate, expected) {
            return Err(HubError::auth("invalid admin password"));
        }
        let token = generate_token();
        let expiry = now_secs() + self.timeout_secs();
        let (snapshot, cleanup_enabled) = {
            let mut table = self.lock()?;
            table.sessions.insert(token.clone(), expiry);
            (table.sessions.clone(), table.cleanup_enabled)
        };
        self.persist(&snapshot)?;
        info!("admin session issued");
        Ok(IssuedSession {
            token,
            cleanup_enabled,
        })
    }

    /// Validate a session token. A live token has its expiry slid
    /// forward; a stale one is removed on sight. While cleanup is
    /// disabled every known token stays valid, but expiries do not
    /// slide, so a token used only during that window keeps its old
    /// expiry and is swept once cleanup is back on.
    pub fn authenticate(&self, token: &str) -> HubResult<bool> {
        let timeout = self.timeout_secs();
        let now = now_secs();
        let removed_snapshot = {
            let mut table = self.lock()?;
            match table.sessions.get(token).copied() {
                None => return Ok(false),
                Some(_) if !table.cleanup_enabled => return Ok(true),
                Some(expiry) if now < expiry => {
                    table.sessions.insert(token.to_string(), now + timeout);
                    return Ok(true);
                }
                Some(_) => {
                    table.sessions.remove(token);
                    table.sessions.clone()
                }
            }
        };
        self.persist(&removed_snapshot)?;
        Ok(false)
    }

    /// Constant-time check against the static API key.
    pub fn verify_api_key(&self, candidate: &str) -> HubResult<bool> {
        let guard = self.api_key.read().map_err(|_| HubError::MutexPoisoned {
            resource: "api key".into(),
        })?;
        Ok(matches!(guard.as_deref(), Some(key) if digest_eq(candidate, key)))
    }

    /// Replace the static API key. The key is persisted to the secrets
    /// file before the in-memory copy is swapped.
    pub fn rotate_api_key(&self, new_key: &str) -> HubResult<()> {
        let key = sanitize_api_key(new_key)?;
        self.secrets.set(API_KEY_SECRET, &key)?;
        let mut guard = self.api_key.write().map_err(|_| HubError::MutexPoisoned {
            resource: "api key".into(),
        })?;
        *guard = Some(key);
        info!("api key rotated");
        Ok(())
    }

    pub fn toggle_cleanup(&self, enabled: bool) -> HubResult<bool> {
        let mut table = self.lock()?;
        table.cleanup_enabled = enabled;
        info!(enabled, "session cleanup toggled");
        Ok(table.cleanup_enabled)
    }

    pub fn cleanup_enabled(&self) -> HubResult<bool> {
        Ok(self.lock()?.cleanup_enabled)
    }

    /// Drop expired tokens. Persists only when something was removed.
    pub fn sweep_expired(&self) -> HubResult<usize> {
        let now = now_secs();
        let (snapshot, removed) = {
            let mut table = self.lock()?;
            if !table.cleanup_enabled {
                return Ok(0);
            }
            let before = table.sessions.len();
            table.sessions.retain(|_, expiry| *expiry > now);
            let removed = before - table.sessions.len();
            if removed == 0 {
                return Ok(0);
            }
            (table.sessions.clone(), removed)
        };
        self.persist(&snapshot)?;
        Ok(removed)
    }

    pub fn session_count(&self) -> HubResult<usize> {
        Ok(self.lock()?.sessions.len())
    }

    #[cfg(test)]
    pub fn plant_session(&self, token: &str, expiry: u64) -> HubResult<()> {
        let snapshot = {
            let mut table = self.lock()?;
            table.sessions.insert(token.to_string(), expiry);
            table.sessions.clone()
        };
        self.persist(&snapshot)
    }
}

/// Periodic sweep of expired sessions.
pub fn spawn_sweeper(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match manager.sweep_expired() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired sessions"),
                Err(err) => warn!(%err, "session sweep failed"),
            }
        }
    })
}
