use std::sync::Arc;

use crate::config::HubConfig;
use crate::sessions::SessionManager;

fn manager(dir: &tempfile::TempDir) -> (HubConfig, Arc<SessionManager>) {
    let config = HubConfig::for_tests(dir.path());
    let manager = Arc::new(SessionManager::new(&config));
    (config, manager)
}

#[test]
fn wrong_password_issues_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (config, manager) = manager(&dir);
    assert!(manager.verify_password("not-the-password").is_err());
    assert_eq!(manager.session_count().unwrap(), 0);
    assert!(!config.sessions_file().exists());
}

#[test]
fn issued_token_authenticates_and_slides() {
    let dir = tempfile::tempdir().unwrap();
    let (_, manager) = manager(&dir);
    let issued = manager.verify_password("hunter2-admin").unwrap();
    assert_eq!(issued.token.len(), 48);
    assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(manager.authenticate(&issued.token).unwrap());
    assert!(manager.authenticate(&issued.token).unwrap());
    assert!(!manager.authenticate("0000000000000000000000000000000000000000000000ff").unwrap());
}

#[test]
fn tokens_are_unique_per_issue() {
    let dir = tempfile::tempdir().unwrap();
    let (_, manager) = manager(&dir);
    let a = manager.verify_password("hunter2-admin").unwrap();
    let b = manager.verify_password("hunter2-admin").unwrap();
    assert_ne!(a.token, b.token);
}

#[test]
fn sessions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig::for_tests(dir.path());
    let token = {
        let manager = SessionManager::new(&config);
        manager.verify_password("hunter2-admin").unwrap().token
    };
    let reloaded = SessionManager::new(&config);
    assert!(reloaded.authenticate(&token).unwrap());
}

#[test]
fn stale_token_is_removed_on_sight_when_cleanup_is_on() {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig::for_tests(dir.path());
    // Expire instantly: one-minute timeout is the smallest the theme
    // override can express, so plant an already-expired table instead.
    let manager = SessionManager::new(&config);
    let token = manager.verify_password("hunter2-admin").unwrap().token;
    let expired = std::collections::BTreeMap::from([(token.clone(), 1u64)]);
    crate::file_store::write_json_restricted(&config.sessions_file(), &expired).unwrap();

    let reloaded = SessionManager::new(&config);
    // Load already drops expired entries.
    assert_eq!(reloaded.session_count().unwrap(), 0);
    assert!(!reloaded.authenticate(&token).unwrap());
}

#[test]
fn cleanup_disabled_keeps_tokens_alive_until_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let (_, manager) = manager(&dir);
    let token = manager.verify_password("hunter2-admin").unwrap().token;
    manager.toggle_cleanup(false).unwrap();

    // Disabled cleanup means no sweeping and no expiry checks.
    assert_eq!(manager.sweep_expired().unwrap(), 0);
    assert!(manager.authenticate(&token).unwrap());

    manager.toggle_cleanup(true).unwrap();
    // The token was issued moments ago, so its original expiry is
    // still in the future.
    assert!(manager.authenticate(&token).unwrap());
}

#[test]
fn disabled_cleanup_does_not_slide_expiries() {
    let dir = tempfile::tempdir().unwrap();
    let (_, manager) = manager(&dir);
    let token = manager.verify_password("hunter2-admin").unwrap().token;
    manager.plant_session(&token, 1).unwrap();
    manager.toggle_cleanup(false).unwrap();

    // The long-expired token still authenticates while cleanup is off,
    // but using it must not refresh its expiry.
    assert!(manager.authenticate(&token).unwrap());
    assert!(manager.authenticate(&token).unwrap());

    manager.toggle_cleanup(true).unwrap();
    assert_eq!(manager.sweep_expired().unwrap(), 1);
    assert!(!manager.authenticate(&token).unwrap());
}

#[test]
fn sweep_removes_only_expired_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (config, manager) = manager(&dir);
    let live = manager.verify_password("hunter2-admin").unwrap().token;
    manager
        .plant_session("00000000000000000000000000000000000000000000dead", 1)
        .unwrap();

    assert_eq!(manager.sweep_expired().unwrap(), 1);
    assert!(manager.authenticate(&live).unwrap());
    assert_eq!(manager.session_count().unwrap(), 1);

    // The sweep persisted the pruned table.
    let table: std::collections::BTreeMap<String, u64> =
        crate::file_store::read_json(&config.sessions_file()).unwrap();
    assert!(table.contains_key(&live));
    assert_eq!(table.len(), 1);
}

#[test]
fn api_key_rotation_is_immediate_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let (config, manager) = manager(&dir);
    assert!(manager.verify_api_key("testkeytestkey01").unwrap());

    manager.rotate_api_key("brand-new-key-0123456789").unwrap();
    assert!(!manager.verify_api_key("testkeytestkey01").unwrap());
    assert!(manager.verify_api_key("brandnewkey0123456789").unwrap());

    let secrets = crate::secrets_store::SecretsStore::new(config.secrets_file());
    assert_eq!(
        secrets.get("HUB_API_KEY").unwrap().as_deref(),
        Some("brandnewkey0123456789")
    );
}

#[test]
fn weak_rotation_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, manager) = manager(&dir);
    assert!(manager.rotate_api_key("short").is_err());
    // The old key still works.
    assert!(manager.verify_api_key("testkeytestkey01").unwrap());
}

#[test]
fn theme_session_timeout_is_honored_at_issue() {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig::for_tests(dir.path());
    std::fs::write(
        config.theme_file(),
        serde_json::json!({ "session_timeout": 120 }).to_string(),
    )
    .unwrap();
    let manager = SessionManager::new(&config);
    let token = manager.verify_password("hunter2-admin").unwrap().token;
    let table: std::collections::BTreeMap<String, u64> =
        crate::file_store::read_json(&config.sessions_file()).unwrap();
    let expiry = table[&token];
    let now = chrono::Utc::now().timestamp() as u64;
    // 120 minutes out, give or take scheduling.
    assert!(expiry > now + 7000 && expiry <= now + 7200 + 5);
}
