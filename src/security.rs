//! Request authentication and caller roles
//!
//! Three callers exist: an admin with a live session token, an automation
//! client with the static API key, and an anonymous guest on the handful
//! of read endpoints that allow one. Headers are checked first; a
//! `?token=` query value (used by EventSource clients and webhooks, which
//! cannot set headers) is accepted as either credential.

use axum::http::HeaderMap;
use serde::Serialize;

use crate::errors::{HubError, HubResult};
use crate::sessions::SessionManager;

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    ApiKey,
    Guest,
}

impl Role {
    /// Admin-gated routes accept the session token or the static key.
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::ApiKey)
    }

    pub fn is_authenticated(self) -> bool {
        self != Role::Guest
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve the caller's role from credentials. Never errors on bad
/// credentials; an unrecognized caller is simply a `Guest`.
pub fn resolve_role(
    sessions: &SessionManager,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> HubResult<Role> {
    if let Some(token) = header_value(headers, SESSION_TOKEN_HEADER) {
        if sessions.authenticate(token)? {
            return Ok(Role::Admin);
        }
    }
    if let Some(key) = header_value(headers, API_KEY_HEADER) {
        if sessions.verify_api_key(key)? {
            return Ok(Role::ApiKey);
        }
    }
    if let Some(token) = query_token {
        if sessions.authenticate(token)? {
            return Ok(Role::Admin);
        }
        if sessions.verify_api_key(token)? {
            return Ok(Role::ApiKey);
        }
    }
    Ok(Role::Guest)
}

/// Admin or API-key caller, or `Unauthorized`.
pub fn require_admin(
    sessions: &SessionManager,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> HubResult<Role> {
    let role = resolve_role(sessions, headers, query_token)?;
    if role.is_admin() {
        Ok(role)
    } else {
        Err(HubError::auth("admin credentials required"))
    }
}

/// Any authenticated caller, or `Unauthorized`.
pub fn require_authenticated(
    sessions: &SessionManager,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> HubResult<Role> {
    let role = resolve_role(sessions, headers, query_token)?;
    if role.is_authenticated() {
        Ok(role)
    } else {
        Err(HubError::auth("authentication required"))
    }
}
