#![forbid(unsafe_code)]

use tether_kernel_contracts::UnixTimeSecs;
use tether_storage::kv::{StorageError, TetherStore};
use tether_storage::repo::{keys, ScheduledEventRecord, ScheduledEventRepo};

#[test]
fn at_sched_db_01_put_get_clear_round_trip() {
    let mut s = TetherStore::new_in_memory();
    assert_eq!(s.scheduled_event("daily_health_report").unwrap(), None);

    let rec = ScheduledEventRecord::v1(
        "daily_health_report".to_string(),
        UnixTimeSecs(130),
        86_400,
    )
    .unwrap();
    s.put_scheduled_event(rec.clone()).unwrap();
    assert_eq!(s.scheduled_event("daily_health_report").unwrap(), Some(rec));

    s.clear_scheduled_event("daily_health_report").unwrap();
    assert_eq!(s.scheduled_event("daily_health_report").unwrap(), None);
}

#[test]
fn at_sched_db_02_garbage_record_surfaces_as_error() {
    let mut s = TetherStore::new_in_memory();
    s.option_set(
        &format!("{}daily_health_report", keys::SCHEDULED_EVENT_PREFIX),
        "not json".to_string(),
    )
    .unwrap();
    assert!(matches!(
        s.scheduled_event("daily_health_report"),
        Err(StorageError::Serialization(_))
    ));
}

#[test]
fn at_sched_db_03_clearing_missing_event_is_noop() {
    let mut s = TetherStore::new_in_memory();
    s.clear_scheduled_event("never_scheduled").unwrap();
}
