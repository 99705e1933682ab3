#![forbid(unsafe_code)]

use tether_kernel_contracts::UnixTimeSecs;
use tether_storage::kv::TetherStore;
use tether_storage::repo::{ReleaseCacheRepo, RetryThrottleRepo};

const HOUR: u64 = 3_600;

#[test]
fn at_cache_db_01_throttle_marker_lives_for_ttl() {
    let mut s = TetherStore::new_in_memory();
    let t0 = UnixTimeSecs(1_000_000);
    assert!(!s.retry_throttle_active(t0));

    s.mark_registration_attempt(t0, 12 * HOUR).unwrap();
    assert!(s.retry_throttle_active(t0));
    assert!(s.retry_throttle_active(t0.plus_secs(12 * HOUR - 1)));
    assert!(!s.retry_throttle_active(t0.plus_secs(12 * HOUR)));
}

#[test]
fn at_cache_db_02_release_blob_expires_and_keeps_fetch_time() {
    let mut s = TetherStore::new_in_memory();
    let t0 = UnixTimeSecs(5_000);
    s.put_cached_release_blob(r#"{"tag_name":"v1.0.0"}"#.to_string(), t0, 6 * HOUR)
        .unwrap();

    let hit = s.cached_release_blob(t0.plus_secs(HOUR)).unwrap();
    assert_eq!(hit.stored_at, t0);
    assert_eq!(hit.value, r#"{"tag_name":"v1.0.0"}"#);
    assert!(s.cached_release_blob(t0.plus_secs(7 * HOUR)).is_none());
}

#[test]
fn at_cache_db_03_release_blob_replacement_refreshes_ttl() {
    let mut s = TetherStore::new_in_memory();
    let t0 = UnixTimeSecs(0);
    s.put_cached_release_blob("old".to_string(), t0, 6 * HOUR)
        .unwrap();
    s.put_cached_release_blob("new".to_string(), t0.plus_secs(5 * HOUR), 6 * HOUR)
        .unwrap();
    let hit = s.cached_release_blob(t0.plus_secs(10 * HOUR)).unwrap();
    assert_eq!(hit.value, "new");
}

#[test]
fn at_cache_db_04_throttle_and_release_cache_are_independent() {
    let mut s = TetherStore::new_in_memory();
    let t0 = UnixTimeSecs(100);
    s.mark_registration_attempt(t0, 12 * HOUR).unwrap();
    assert!(s.cached_release_blob(t0).is_none());
    s.put_cached_release_blob("{}".to_string(), t0, 6 * HOUR)
        .unwrap();
    assert!(s.retry_throttle_active(t0.plus_secs(7 * HOUR)));
    assert!(s.cached_release_blob(t0.plus_secs(7 * HOUR)).is_none());
}
