#![forbid(unsafe_code)]

use tether_kernel_contracts::registration::{ActivationKey, RegistrationStatus};
use tether_kernel_contracts::UnixTimeSecs;
use tether_storage::kv::{StorageError, TetherStore};
use tether_storage::repo::{keys, RegistrationStateRepo};

fn key(raw: &str) -> ActivationKey {
    ActivationKey::sanitize(raw).unwrap()
}

#[test]
fn at_reg_db_01_fresh_store_reads_unset() {
    let s = TetherStore::new_in_memory();
    let state = s.registration_state().unwrap();
    assert_eq!(state.status, RegistrationStatus::Unset);
    assert_eq!(state.activation_key, None);
    assert_eq!(state.registered_at, None);
    assert_eq!(state.request_id, None);
}

#[test]
fn at_reg_db_02_reset_clears_key_and_sets_pending_with_time() {
    let mut s = TetherStore::new_in_memory();
    s.apply_registration_status(&RegistrationStatus::Activated, Some(&key("abc123")), Some("req-1"))
        .unwrap();
    s.reset_registration_pending(UnixTimeSecs(1_700_000_000))
        .unwrap();

    let state = s.registration_state().unwrap();
    assert_eq!(state.status, RegistrationStatus::Pending);
    assert_eq!(state.activation_key, None);
    assert_eq!(state.request_id, None);
    assert_eq!(state.registered_at, Some(UnixTimeSecs(1_700_000_000)));
    assert_eq!(s.option_get(keys::REGISTRATION_TIME), Some("1700000000"));
}

#[test]
fn at_reg_db_03_activated_with_key_persists_both() {
    let mut s = TetherStore::new_in_memory();
    s.reset_registration_pending(UnixTimeSecs(10)).unwrap();
    s.apply_registration_status(&RegistrationStatus::Activated, Some(&key("abc123")), None)
        .unwrap();

    let state = s.registration_state().unwrap();
    assert_eq!(state.status, RegistrationStatus::Activated);
    assert_eq!(state.activation_key.as_ref().map(ActivationKey::as_str), Some("abc123"));
    assert_eq!(state.registered_at, Some(UnixTimeSecs(10)));
    assert!(state.feature_access_granted());
}

#[test]
fn at_reg_db_04_non_activated_status_never_keeps_key() {
    let mut s = TetherStore::new_in_memory();
    s.apply_registration_status(&RegistrationStatus::Activated, Some(&key("abc123")), None)
        .unwrap();
    s.apply_registration_status(&RegistrationStatus::Rejected, Some(&key("ignored")), None)
        .unwrap();

    let state = s.registration_state().unwrap();
    assert_eq!(state.status, RegistrationStatus::Rejected);
    assert_eq!(state.activation_key, None);
    assert_eq!(s.option_get(keys::ACTIVATION_KEY), None);
}

#[test]
fn at_reg_db_05_unknown_server_status_round_trips() {
    let mut s = TetherStore::new_in_memory();
    s.apply_registration_status(&RegistrationStatus::parse("under_review"), None, Some("req-9"))
        .unwrap();
    let state = s.registration_state().unwrap();
    assert_eq!(
        state.status,
        RegistrationStatus::Other("under_review".to_string())
    );
    assert_eq!(state.request_id.as_deref(), Some("req-9"));
}

#[test]
fn at_reg_db_06_request_id_survives_status_without_one() {
    let mut s = TetherStore::new_in_memory();
    s.apply_registration_status(&RegistrationStatus::Pending, None, Some("req-1"))
        .unwrap();
    s.apply_registration_status(&RegistrationStatus::Pending, None, None)
        .unwrap();
    assert_eq!(
        s.registration_state().unwrap().request_id.as_deref(),
        Some("req-1")
    );
}

#[test]
fn at_reg_db_07_corrupt_registration_time_is_reported() {
    let mut s = TetherStore::new_in_memory();
    s.option_set(keys::REGISTRATION_TIME, "yesterday".to_string())
        .unwrap();
    assert_eq!(
        s.registration_state(),
        Err(StorageError::InvalidRecord {
            key: keys::REGISTRATION_TIME.to_string(),
            reason: "must be integer epoch seconds",
        })
    );
}

#[test]
fn at_reg_db_08_file_backed_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let mut s = TetherStore::open_file(&path).unwrap();
        s.reset_registration_pending(UnixTimeSecs(42)).unwrap();
        s.apply_registration_status(&RegistrationStatus::Activated, Some(&key("k-1")), None)
            .unwrap();
    }
    let s = TetherStore::open_file(&path).unwrap();
    let state = s.registration_state().unwrap();
    assert_eq!(state.status, RegistrationStatus::Activated);
    assert_eq!(state.registered_at, Some(UnixTimeSecs(42)));
    assert_eq!(state.activation_key.as_ref().map(ActivationKey::as_str), Some("k-1"));
}
