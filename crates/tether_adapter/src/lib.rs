#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use tether_engines::http_client::{HttpClient, UreqHttpClient};
use tether_kernel_contracts::registration::ActivationKey;
use tether_kernel_contracts::release::UpdateDescriptor;
use tether_os::clock::{Clock, SystemClock};
use tether_os::config::TetherConfig;
use tether_os::health::HealthReportOutcome;
use tether_os::probe::{InstallationProbe, StaticInstallationProbe};
use tether_os::registration::RegistrationOutcome;
use tether_os::triggers::{TimerScheduling, TriggerSurface};
use tether_storage::kv::TetherStore;

pub const ENV_STATE_PATH: &str = "TETHER_STATE_PATH";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistrationHookResponse {
    pub status: String,
    pub outcome: String,
    pub registration_status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InstallHookResponse {
    pub status: String,
    pub registration: RegistrationHookResponse,
    pub daily_timer_next_run_at: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActivationAdapterRequest {
    pub request_id: Option<String>,
    pub activation_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UpdateCheckResponse {
    pub status: String,
    pub update_available: bool,
    pub update: Option<UpdateDescriptor>,
}

/// Registration view for the host. The activation key itself is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistrationReportResponse {
    pub status: String,
    pub registration_status: String,
    pub feature_access: bool,
    pub registered_at: Option<u64>,
    pub request_id: Option<String>,
    pub daily_timer_next_run_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeactivateHookResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub daily_timer_scheduled: bool,
}

/// One installation's trigger surface, as driven by the HTTP adapter and its scheduler tick.
pub struct AdapterRuntime<H = UreqHttpClient, P = StaticInstallationProbe, K = SystemClock> {
    surface: TriggerSurface<TetherStore, H, P, K>,
}

impl AdapterRuntime {
    pub fn default_from_env() -> Result<Self, String> {
        let config = TetherConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;
        let probe = StaticInstallationProbe::from_env()
            .map_err(|e| format!("invalid installation identity: {e}"))?;
        let store = match state_path_from_env() {
            Some(path) => TetherStore::open_file(&path).map_err(|e| {
                format!("failed to open state store '{}': {e}", path.display())
            })?,
            None => {
                tracing::warn!("{ENV_STATE_PATH} not set; state is kept in memory only");
                TetherStore::new_in_memory()
            }
        };
        Ok(Self::new(
            store,
            config,
            UreqHttpClient::default(),
            probe,
            SystemClock,
        ))
    }
}

impl<H, P, K> AdapterRuntime<H, P, K>
where
    H: HttpClient,
    P: InstallationProbe,
    K: Clock,
{
    pub fn new(store: TetherStore, config: TetherConfig, http: H, probe: P, clock: K) -> Self {
        Self {
            surface: TriggerSurface::new(store, config, http, probe, clock),
        }
    }

    pub fn run_install_hook(&mut self) -> InstallHookResponse {
        let report = self.surface.on_install();
        let registration = self.registration_hook_response(&report.registration);
        let (next_run_at, reason) = match report.daily_timer {
            TimerScheduling::Created(record) | TimerScheduling::AlreadyScheduled(record) => {
                (Some(record.next_run_at.0), None)
            }
            TimerScheduling::Failed(err) => (None, Some(err.to_string())),
        };
        InstallHookResponse {
            status: "ok".to_string(),
            registration,
            daily_timer_next_run_at: next_run_at,
            reason,
        }
    }

    pub fn run_admin_enter_hook(&mut self) -> RegistrationHookResponse {
        let outcome = self.surface.on_admin_context_enter();
        self.registration_hook_response(&outcome)
    }

    pub fn run_deactivate_hook(&mut self) -> DeactivateHookResponse {
        match self.surface.on_deactivate() {
            Ok(()) => DeactivateHookResponse {
                status: "ok".to_string(),
                outcome: "TIMER_CLEARED".to_string(),
                reason: None,
            },
            Err(err) => DeactivateHookResponse {
                status: "error".to_string(),
                outcome: "FAILED".to_string(),
                reason: Some(err.to_string()),
            },
        }
    }

    /// Rejects a key that is empty once sanitized; everything else goes to the control plane.
    pub fn submit_activation(
        &mut self,
        request: ActivationAdapterRequest,
    ) -> Result<RegistrationHookResponse, String> {
        let key = ActivationKey::sanitize(&request.activation_key)
            .ok_or_else(|| "activation_key must not be empty".to_string())?;
        let outcome = self
            .surface
            .on_activation_submitted(request.request_id.as_deref(), key);
        Ok(self.registration_hook_response(&outcome))
    }

    pub fn run_update_check(&mut self) -> UpdateCheckResponse {
        let update = self.surface.on_update_check();
        UpdateCheckResponse {
            status: "ok".to_string(),
            update_available: update.is_some(),
            update,
        }
    }

    pub fn registration_report(&self) -> Result<RegistrationReportResponse, String> {
        let state = self
            .surface
            .registration_state()
            .map_err(|e| format!("registration state unreadable: {e}"))?;
        Ok(RegistrationReportResponse {
            status: "ok".to_string(),
            registration_status: state.status.to_string(),
            feature_access: state.feature_access_granted(),
            registered_at: state.registered_at.map(|t| t.0),
            request_id: state.request_id,
            daily_timer_next_run_at: self.surface.daily_timer().map(|r| r.next_run_at.0),
        })
    }

    /// One scheduler pass. Returns the report outcome when the daily timer fired.
    pub fn run_scheduler_tick(&mut self) -> Option<HealthReportOutcome> {
        let now = self.surface.now();
        self.surface.run_due_events(now)
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        match self.surface.registration_state() {
            Ok(_) => AdapterHealthResponse {
                status: "ok".to_string(),
                outcome: "HEALTHY".to_string(),
                reason: None,
                daily_timer_scheduled: self.surface.daily_timer().is_some(),
            },
            Err(err) => AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(err.to_string()),
                daily_timer_scheduled: self.surface.daily_timer().is_some(),
            },
        }
    }

    fn registration_hook_response(&self, outcome: &RegistrationOutcome) -> RegistrationHookResponse {
        let registration_status = self
            .surface
            .registration_state()
            .map(|s| s.status.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (outcome, reason) = match outcome {
            RegistrationOutcome::Applied(_) => ("APPLIED", None),
            RegistrationOutcome::SkippedActivated => ("SKIPPED_ACTIVATED", None),
            RegistrationOutcome::SkippedThrottled => ("SKIPPED_THROTTLED", None),
            RegistrationOutcome::Failed(err) => ("FAILED", Some(err.to_string())),
        };
        RegistrationHookResponse {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            registration_status,
            reason,
        }
    }
}

fn state_path_from_env() -> Option<PathBuf> {
    env::var(ENV_STATE_PATH)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
