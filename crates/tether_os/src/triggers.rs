#![forbid(unsafe_code)]

//! Named entry points the host calls on lifecycle events and timers.
//!
//! Each trigger runs to completion on the caller's thread and never returns an
//! error to the host: failures are logged and folded into the returned outcome.

use std::sync::Arc;

use tether_engines::http_client::HttpClient;
use tether_kernel_contracts::registration::{ActivationKey, RegistrationState};
use tether_kernel_contracts::release::UpdateDescriptor;
use tether_kernel_contracts::UnixTimeSecs;
use tether_storage::kv::StorageError;
use tether_storage::repo::{
    RegistrationStateRepo, ReleaseCacheRepo, RetryThrottleRepo, ScheduledEventRecord,
    ScheduledEventRepo,
};

use crate::clock::Clock;
use crate::config::TetherConfig;
use crate::health::{HealthReportOutcome, HealthReporter};
use crate::probe::InstallationProbe;
use crate::registration::{RegistrationManager, RegistrationOutcome};
use crate::release::ReleaseChecker;

pub const DAILY_HEALTH_REPORT_HOOK: &str = "daily_health_report";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerScheduling {
    Created(ScheduledEventRecord),
    AlreadyScheduled(ScheduledEventRecord),
    Failed(StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub registration: RegistrationOutcome,
    pub daily_timer: TimerScheduling,
}

/// Everything a store must offer to back the trigger surface.
pub trait TetherStateStore:
    RegistrationStateRepo + RetryThrottleRepo + ReleaseCacheRepo + ScheduledEventRepo
{
}

impl<T> TetherStateStore for T where
    T: RegistrationStateRepo + RetryThrottleRepo + ReleaseCacheRepo + ScheduledEventRepo
{
}

pub struct TriggerSurface<S, H, P, K> {
    store: S,
    config: TetherConfig,
    probe: Arc<P>,
    clock: Arc<K>,
    registration: RegistrationManager<Arc<H>, Arc<P>, Arc<K>>,
    releases: ReleaseChecker<Arc<H>, Arc<K>>,
    health: HealthReporter<Arc<H>, Arc<P>>,
}

impl<S, H, P, K> TriggerSurface<S, H, P, K>
where
    S: TetherStateStore,
    H: HttpClient,
    P: InstallationProbe,
    K: Clock,
{
    pub fn new(store: S, config: TetherConfig, http: H, probe: P, clock: K) -> Self {
        let http = Arc::new(http);
        let probe = Arc::new(probe);
        let clock = Arc::new(clock);
        Self {
            registration: RegistrationManager::new(
                config.clone(),
                Arc::clone(&http),
                Arc::clone(&probe),
                Arc::clone(&clock),
            ),
            releases: ReleaseChecker::new(config.clone(), Arc::clone(&http), Arc::clone(&clock)),
            health: HealthReporter::new(config.clone(), http, Arc::clone(&probe)),
            store,
            config,
            probe,
            clock,
        }
    }

    pub fn on_install(&mut self) -> InstallReport {
        let registration = self.registration.reset_and_register(&mut self.store);
        let daily_timer = self.ensure_daily_timer_scheduled();
        InstallReport {
            registration,
            daily_timer,
        }
    }

    pub fn on_admin_context_enter(&mut self) -> RegistrationOutcome {
        self.registration.maybe_retry_registration(&mut self.store)
    }

    pub fn on_update_check(&mut self) -> Option<UpdateDescriptor> {
        let current = match self.probe.identity() {
            Ok(identity) => identity.product_version,
            Err(err) => {
                tracing::warn!(error = %err, "update check skipped; installation identity unavailable");
                return None;
            }
        };
        let offer = self.releases.update_descriptor(&mut self.store, &current);
        if let Some(offer) = &offer {
            tracing::info!(current = current.as_str(), available = offer.new_version.as_str(), "update available");
        }
        offer
    }

    pub fn on_daily_timer(&self) -> HealthReportOutcome {
        self.health.send_daily_report()
    }

    pub fn on_activation_submitted(
        &mut self,
        request_id: Option<&str>,
        activation_key: ActivationKey,
    ) -> RegistrationOutcome {
        self.registration
            .submit_activation(&mut self.store, request_id, activation_key)
    }

    /// Creates the daily timer unless one is already registered. An unreadable record is replaced.
    pub fn ensure_daily_timer_scheduled(&mut self) -> TimerScheduling {
        match self.store.scheduled_event(DAILY_HEALTH_REPORT_HOOK) {
            Ok(Some(existing)) => return TimerScheduling::AlreadyScheduled(existing),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "daily timer record unreadable; rescheduling")
            }
        }
        let first_run = self
            .clock
            .now()
            .plus_secs(self.config.health_report_first_delay_secs);
        let created = ScheduledEventRecord::v1(
            DAILY_HEALTH_REPORT_HOOK.to_string(),
            first_run,
            self.config.health_report_interval_secs,
        )
        .map_err(StorageError::from)
        .and_then(|record| {
            self.store.put_scheduled_event(record.clone())?;
            Ok(record)
        });
        match created {
            Ok(record) => {
                tracing::info!(next_run_at = %record.next_run_at, "daily timer scheduled");
                TimerScheduling::Created(record)
            }
            Err(err) => {
                tracing::warn!(error = %err, "daily timer could not be scheduled");
                TimerScheduling::Failed(err)
            }
        }
    }

    /// Fires the daily timer when due. Missed slots collapse into one run.
    pub fn run_due_events(&mut self, now: UnixTimeSecs) -> Option<HealthReportOutcome> {
        let record = match self.store.scheduled_event(DAILY_HEALTH_REPORT_HOOK) {
            Ok(Some(record)) if record.is_due(now) => record,
            Ok(_) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "daily timer record unreadable");
                return None;
            }
        };
        let outcome = self.on_daily_timer();
        let next = record.advanced_past(now);
        if let Err(err) = self.store.put_scheduled_event(next) {
            tracing::warn!(error = %err, "daily timer could not be advanced");
        }
        Some(outcome)
    }

    /// Unschedules the daily timer. Registration state is kept.
    pub fn on_deactivate(&mut self) -> Result<(), StorageError> {
        self.store
            .clear_scheduled_event(DAILY_HEALTH_REPORT_HOOK)
            .inspect_err(|err| tracing::warn!(error = %err, "daily timer could not be cleared"))?;
        tracing::info!("daily timer cleared");
        Ok(())
    }

    pub fn daily_timer(&self) -> Option<ScheduledEventRecord> {
        self.store
            .scheduled_event(DAILY_HEALTH_REPORT_HOOK)
            .ok()
            .flatten()
    }

    pub fn registration_state(&self) -> Result<RegistrationState, StorageError> {
        self.store.registration_state()
    }

    pub fn feature_access(&self) -> bool {
        self.registration.feature_access(&self.store)
    }

    pub fn now(&self) -> UnixTimeSecs {
        self.clock.now()
    }
}
