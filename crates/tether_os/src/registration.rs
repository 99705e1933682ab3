#![forbid(unsafe_code)]

//! Registration / activation state machine.
//!
//! `Unset -> Pending` happens only through [`RegistrationManager::reset_and_register`].
//! Every other transition is driven by a control-plane reply carrying `status`.
//! Ambiguous replies (non-200, unparsable, no `status`) never move the state.

use tether_engines::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use tether_kernel_contracts::registration::{
    ActivationKey, ActivationRequest, RegistrationRequest, RegistrationResponse,
    RegistrationStatus,
};
use tether_kernel_contracts::ContractViolation;
use tether_storage::kv::StorageError;
use tether_storage::repo::{RegistrationStateRepo, RetryThrottleRepo};

use crate::clock::Clock;
use crate::config::TetherConfig;
use crate::probe::InstallationProbe;

pub const REGISTER_PATH: &str = "register";
pub const ACTIVATE_PATH: &str = "activate";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("control plane unreachable: {0}")]
    Transport(#[from] HttpError),
    #[error("control plane answered http {status}")]
    UnexpectedStatus { status: u16 },
    #[error("control plane reply ignored: {reason}")]
    MalformedResponse { reason: &'static str },
    #[error("installation identity unavailable: {0}")]
    Identity(ContractViolation),
    #[error("registration state store failed: {0}")]
    Storage(#[from] StorageError),
}

/// What a registration entry point did. Failures are already logged when returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Applied(RegistrationStatus),
    SkippedActivated,
    SkippedThrottled,
    /// State left untouched.
    Failed(RegistrationError),
}

#[derive(Debug, Clone)]
pub struct RegistrationManager<H, P, K> {
    config: TetherConfig,
    http: H,
    probe: P,
    clock: K,
}

impl<H, P, K> RegistrationManager<H, P, K>
where
    H: HttpClient,
    P: InstallationProbe,
    K: Clock,
{
    pub fn new(config: TetherConfig, http: H, probe: P, clock: K) -> Self {
        Self {
            config,
            http,
            probe,
            clock,
        }
    }

    /// Install/activate entry: forget any previous approval, go pending, register now.
    pub fn reset_and_register<S>(&self, store: &mut S) -> RegistrationOutcome
    where
        S: RegistrationStateRepo,
    {
        let now = self.clock.now();
        if let Err(err) = store.reset_registration_pending(now) {
            return settle("reset_and_register", Err(err.into()));
        }
        tracing::info!(registered_at = %now, "registration reset to pending");
        settle(
            "reset_and_register",
            self.send_registration_request(store),
        )
    }

    /// Admin-context entry: retry while not activated, at most once per throttle window.
    pub fn maybe_retry_registration<S>(&self, store: &mut S) -> RegistrationOutcome
    where
        S: RegistrationStateRepo + RetryThrottleRepo,
    {
        let now = self.clock.now();
        let state = match store.registration_state() {
            Ok(state) => state,
            Err(err) => return settle("maybe_retry_registration", Err(err.into())),
        };
        if state.status.is_activated() {
            return RegistrationOutcome::SkippedActivated;
        }
        if store.retry_throttle_active(now) {
            tracing::debug!(status = %state.status, "registration retry throttled");
            return RegistrationOutcome::SkippedThrottled;
        }
        let result = self.send_registration_request(store);
        if let Err(err) = store.mark_registration_attempt(now, self.config.retry_throttle_ttl_secs)
        {
            tracing::warn!(error = %err, "failed to record registration attempt marker");
        }
        settle("maybe_retry_registration", result)
    }

    /// Activation handshake as submitted by the host's admin surface. Uses the stored
    /// request id when none is supplied.
    pub fn submit_activation<S>(
        &self,
        store: &mut S,
        request_id: Option<&str>,
        activation_key: ActivationKey,
    ) -> RegistrationOutcome
    where
        S: RegistrationStateRepo,
    {
        let result = self.send_activation_request(store, request_id, activation_key);
        settle("submit_activation", result)
    }

    /// Gate for premium features.
    pub fn feature_access<S>(&self, store: &S) -> bool
    where
        S: RegistrationStateRepo,
    {
        match store.registration_state() {
            Ok(state) => state.feature_access_granted(),
            Err(err) => {
                tracing::warn!(error = %err, "registration state unreadable; feature access denied");
                false
            }
        }
    }

    fn send_registration_request<S>(
        &self,
        store: &mut S,
    ) -> Result<RegistrationStatus, RegistrationError>
    where
        S: RegistrationStateRepo,
    {
        let identity = self.probe.identity().map_err(RegistrationError::Identity)?;
        let payload = RegistrationRequest::from_identity(&identity);
        let request = self
            .control_plane_request(REGISTER_PATH)
            .form_fields(&payload.form_fields());
        let response = self.http.execute(&request)?;
        apply_control_plane_reply(store, &response)
    }

    fn send_activation_request<S>(
        &self,
        store: &mut S,
        request_id: Option<&str>,
        activation_key: ActivationKey,
    ) -> Result<RegistrationStatus, RegistrationError>
    where
        S: RegistrationStateRepo,
    {
        let request_id = match request_id.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => r.to_string(),
            None => store
                .registration_state()?
                .request_id
                .ok_or(RegistrationError::Identity(ContractViolation::InvalidValue {
                    field: "activation_request.request_id",
                    reason: "no request id supplied or stored",
                }))?,
        };
        let payload = ActivationRequest::v1(request_id, activation_key)
            .map_err(RegistrationError::Identity)?;
        let request = self
            .control_plane_request(ACTIVATE_PATH)
            .form_fields(&payload.form_fields());
        let response = self.http.execute(&request)?;
        apply_control_plane_reply(store, &response)
    }

    fn control_plane_request(&self, path: &str) -> HttpRequest {
        let request = HttpRequest::post_form(
            self.config.control_plane_endpoint(path),
            self.config.http_timeout,
        );
        match self.config.control_plane_token.as_deref() {
            Some(token) => request.header("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

/// Applies a `/register` or `/activate` reply. Only a 200 carrying `status` is acted on.
fn apply_control_plane_reply<S>(
    store: &mut S,
    response: &HttpResponse,
) -> Result<RegistrationStatus, RegistrationError>
where
    S: RegistrationStateRepo,
{
    if !response.is_ok() {
        return Err(RegistrationError::UnexpectedStatus {
            status: response.status,
        });
    }
    let reply: RegistrationResponse =
        serde_json::from_str(&response.body).map_err(|_| RegistrationError::MalformedResponse {
            reason: "body is not a registration json object",
        })?;
    let status = reply.status().ok_or(RegistrationError::MalformedResponse {
        reason: "reply has no status",
    })?;
    let activation_key = if status.is_activated() {
        let raw = reply.activation_key_text();
        let key = raw.as_deref().and_then(ActivationKey::sanitize);
        if raw.is_some() && key.is_none() {
            tracing::warn!("control plane sent an activation key with no usable characters");
        }
        key
    } else {
        None
    };
    let request_id = reply.request_id();
    if request_id.is_none() && reply.has_request_id() {
        tracing::debug!("control plane request id too long; not stored");
    }

    store.apply_registration_status(&status, activation_key.as_ref(), request_id.as_deref())?;
    Ok(status)
}

fn settle(
    operation: &'static str,
    result: Result<RegistrationStatus, RegistrationError>,
) -> RegistrationOutcome {
    match result {
        Ok(status) => {
            tracing::info!(operation, status = %status, "registration status applied");
            RegistrationOutcome::Applied(status)
        }
        Err(err) => {
            match &err {
                RegistrationError::MalformedResponse { .. } => {
                    tracing::debug!(operation, error = %err, "registration reply ignored")
                }
                _ => tracing::warn!(operation, error = %err, "registration attempt failed"),
            }
            RegistrationOutcome::Failed(err)
        }
    }
}
