#![forbid(unsafe_code)]

use tether_kernel_contracts::registration::{
    ActivationKey, RegistrationState, RegistrationStatus,
};
use tether_kernel_contracts::{ContractViolation, UnixTimeSecs, Validate};

use crate::kv::{StorageError, TetherStore, TransientEntry};

pub mod keys {
    pub const ACTIVATION_KEY: &str = "activation_key";
    pub const REGISTRATION_STATUS: &str = "registration_status";
    pub const REGISTRATION_TIME: &str = "registration_time";
    pub const REGISTRATION_REQUEST_ID: &str = "registration_request_id";
    pub const SCHEDULED_EVENT_PREFIX: &str = "scheduled_event.";

    pub const LAST_REGISTRATION_ATTEMPT: &str = "last_registration_attempt";
    pub const CACHED_LATEST_RELEASE: &str = "cached_latest_release";
}

/// Persisted recurring-timer registration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScheduledEventRecord {
    pub hook: String,
    pub next_run_at: UnixTimeSecs,
    pub interval_secs: u64,
}

impl ScheduledEventRecord {
    pub fn v1(
        hook: String,
        next_run_at: UnixTimeSecs,
        interval_secs: u64,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            hook,
            next_run_at,
            interval_secs,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn is_due(&self, now: UnixTimeSecs) -> bool {
        now >= self.next_run_at
    }

    /// Next run strictly after `now`, stepping in whole intervals from the current slot.
    pub fn advanced_past(&self, now: UnixTimeSecs) -> Self {
        let mut next = self.clone();
        if now >= next.next_run_at {
            let behind = now.secs_since(next.next_run_at);
            let steps = behind / self.interval_secs + 1;
            next.next_run_at = next
                .next_run_at
                .plus_secs(steps.saturating_mul(self.interval_secs));
        }
        next
    }
}

impl Validate for ScheduledEventRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.hook.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "scheduled_event_record.hook",
                reason: "must not be empty",
            });
        }
        if self.interval_secs == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "scheduled_event_record.interval_secs",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Typed repository interface for the persisted registration record.
pub trait RegistrationStateRepo {
    fn registration_state(&self) -> Result<RegistrationState, StorageError>;
    /// Drops any key and request id, marks the installation pending as of `now`.
    fn reset_registration_pending(&mut self, now: UnixTimeSecs) -> Result<(), StorageError>;
    /// Stores a server-issued status. The key is kept only for an activated status.
    fn apply_registration_status(
        &mut self,
        status: &RegistrationStatus,
        activation_key: Option<&ActivationKey>,
        request_id: Option<&str>,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for the registration retry throttle marker.
pub trait RetryThrottleRepo {
    fn retry_throttle_active(&self, now: UnixTimeSecs) -> bool;
    fn mark_registration_attempt(
        &mut self,
        now: UnixTimeSecs,
        ttl_secs: u64,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for the single latest-release cache entry.
pub trait ReleaseCacheRepo {
    fn cached_release_blob(&self, now: UnixTimeSecs) -> Option<&TransientEntry>;
    fn put_cached_release_blob(
        &mut self,
        body: String,
        now: UnixTimeSecs,
        ttl_secs: u64,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for recurring timers.
pub trait ScheduledEventRepo {
    fn scheduled_event(&self, hook: &str) -> Result<Option<ScheduledEventRecord>, StorageError>;
    fn put_scheduled_event(&mut self, record: ScheduledEventRecord) -> Result<(), StorageError>;
    fn clear_scheduled_event(&mut self, hook: &str) -> Result<(), StorageError>;
}

impl RegistrationStateRepo for TetherStore {
    fn registration_state(&self) -> Result<RegistrationState, StorageError> {
        let status = self
            .option_get(keys::REGISTRATION_STATUS)
            .map(RegistrationStatus::parse)
            .unwrap_or(RegistrationStatus::Unset);
        let activation_key = match self.option_get(keys::ACTIVATION_KEY) {
            Some(raw) => Some(ActivationKey::sanitize(raw).ok_or_else(|| {
                StorageError::InvalidRecord {
                    key: keys::ACTIVATION_KEY.to_string(),
                    reason: "stored key is blank after sanitizing",
                }
            })?),
            None => None,
        };
        let registered_at = match self.option_get(keys::REGISTRATION_TIME) {
            Some(raw) => Some(UnixTimeSecs(raw.trim().parse::<u64>().map_err(|_| {
                StorageError::InvalidRecord {
                    key: keys::REGISTRATION_TIME.to_string(),
                    reason: "must be integer epoch seconds",
                }
            })?)),
            None => None,
        };
        let request_id = self
            .option_get(keys::REGISTRATION_REQUEST_ID)
            .map(str::to_string);
        Ok(RegistrationState::v1(
            status,
            activation_key,
            registered_at,
            request_id,
        )?)
    }

    fn reset_registration_pending(&mut self, now: UnixTimeSecs) -> Result<(), StorageError> {
        self.option_write_batch(vec![
            (keys::ACTIVATION_KEY, None),
            (keys::REGISTRATION_REQUEST_ID, None),
            (
                keys::REGISTRATION_STATUS,
                Some(RegistrationStatus::Pending.as_str().to_string()),
            ),
            (keys::REGISTRATION_TIME, Some(now.0.to_string())),
        ])
    }

    fn apply_registration_status(
        &mut self,
        status: &RegistrationStatus,
        activation_key: Option<&ActivationKey>,
        request_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let status_value = match status {
            RegistrationStatus::Unset => None,
            other => Some(other.as_str().to_string()),
        };
        let key_value = if status.is_activated() {
            activation_key.map(|k| k.as_str().to_string())
        } else {
            None
        };
        let mut writes = vec![
            (keys::REGISTRATION_STATUS, status_value),
            (keys::ACTIVATION_KEY, key_value),
        ];
        if let Some(request_id) = request_id.map(str::trim).filter(|r| !r.is_empty()) {
            writes.push((keys::REGISTRATION_REQUEST_ID, Some(request_id.to_string())));
        }
        self.option_write_batch(writes)
    }
}

impl RetryThrottleRepo for TetherStore {
    fn retry_throttle_active(&self, now: UnixTimeSecs) -> bool {
        self.transient_get(keys::LAST_REGISTRATION_ATTEMPT, now)
            .is_some()
    }

    fn mark_registration_attempt(
        &mut self,
        now: UnixTimeSecs,
        ttl_secs: u64,
    ) -> Result<(), StorageError> {
        self.transient_set(
            keys::LAST_REGISTRATION_ATTEMPT,
            now.0.to_string(),
            now,
            ttl_secs,
        )
    }
}

impl ReleaseCacheRepo for TetherStore {
    fn cached_release_blob(&self, now: UnixTimeSecs) -> Option<&TransientEntry> {
        self.transient_get(keys::CACHED_LATEST_RELEASE, now)
    }

    fn put_cached_release_blob(
        &mut self,
        body: String,
        now: UnixTimeSecs,
        ttl_secs: u64,
    ) -> Result<(), StorageError> {
        self.transient_set(keys::CACHED_LATEST_RELEASE, body, now, ttl_secs)
    }
}

impl ScheduledEventRepo for TetherStore {
    fn scheduled_event(&self, hook: &str) -> Result<Option<ScheduledEventRecord>, StorageError> {
        let key = scheduled_event_key(hook);
        let Some(raw) = self.option_get(&key) else {
            return Ok(None);
        };
        let record: ScheduledEventRecord =
            serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
        record.validate()?;
        Ok(Some(record))
    }

    fn put_scheduled_event(&mut self, record: ScheduledEventRecord) -> Result<(), StorageError> {
        record.validate()?;
        let encoded =
            serde_json::to_string(&record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.option_set(&scheduled_event_key(&record.hook), encoded)
    }

    fn clear_scheduled_event(&mut self, hook: &str) -> Result<(), StorageError> {
        self.option_delete(&scheduled_event_key(hook))
    }
}

fn scheduled_event_key(hook: &str) -> String {
    format!("{}{}", keys::SCHEDULED_EVENT_PREFIX, hook)
}
