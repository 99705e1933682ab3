#![forbid(unsafe_code)]

use std::fmt;

use crate::common::{validate_max_len, validate_non_empty};
use crate::installation::InstallationIdentity;
use crate::{ContractViolation, SchemaVersion, UnixTimeSecs, Validate};

pub const REGISTRATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Longest control-plane request id kept for the activation handshake.
pub const MAX_REQUEST_ID_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistrationStatus {
    Unset,
    Pending,
    Activated,
    Rejected,
    /// Any status string the control plane returns that this build does not model.
    Other(String),
}

impl RegistrationStatus {
    /// Maps a stored or wire status string. Blank input is `Unset`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" => RegistrationStatus::Unset,
            "pending" => RegistrationStatus::Pending,
            "activated" => RegistrationStatus::Activated,
            "rejected" => RegistrationStatus::Rejected,
            other => RegistrationStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RegistrationStatus::Unset => "",
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Activated => "activated",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_activated(&self) -> bool {
        matches!(self, RegistrationStatus::Activated)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Unset => f.write_str("unset"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Opaque credential issued by the control plane once an installation is approved.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ActivationKey(String);

impl ActivationKey {
    /// Sanitizes untrusted key text: `<...>` tags and control characters are removed,
    /// whitespace runs collapse to one space, and the result is trimmed. A `<` with no
    /// closing `>` is kept as text. Returns `None` when nothing usable is left.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let chars: Vec<char> = raw.chars().collect();
        let mut without_tags = String::with_capacity(raw.len());
        let mut idx = 0;
        while idx < chars.len() {
            let ch = chars[idx];
            if ch == '<' {
                if let Some(close) = chars[idx + 1..].iter().position(|&c| c == '>') {
                    idx += close + 2;
                    continue;
                }
            }
            if ch.is_whitespace() {
                without_tags.push(' ');
            } else if !ch.is_control() {
                without_tags.push(ch);
            }
            idx += 1;
        }
        let collapsed = without_tags.split_whitespace().collect::<Vec<_>>().join(" ");
        let key = Self(collapsed);
        key.validate().ok()?;
        Some(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ActivationKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("activation_key", &self.0)
    }
}

impl fmt::Debug for ActivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActivationKey(<redacted>)")
    }
}

/// Persisted registration record. Only the registration manager mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationState {
    pub schema_version: SchemaVersion,
    pub status: RegistrationStatus,
    pub activation_key: Option<ActivationKey>,
    pub registered_at: Option<UnixTimeSecs>,
    pub request_id: Option<String>,
}

impl RegistrationState {
    pub fn unset() -> Self {
        Self {
            schema_version: REGISTRATION_CONTRACT_VERSION,
            status: RegistrationStatus::Unset,
            activation_key: None,
            registered_at: None,
            request_id: None,
        }
    }

    pub fn v1(
        status: RegistrationStatus,
        activation_key: Option<ActivationKey>,
        registered_at: Option<UnixTimeSecs>,
        request_id: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let state = Self {
            schema_version: REGISTRATION_CONTRACT_VERSION,
            status,
            activation_key,
            registered_at,
            request_id,
        };
        state.validate()?;
        Ok(state)
    }

    /// Feature access is granted only to an activated installation holding a key.
    pub fn feature_access_granted(&self) -> bool {
        self.status.is_activated() && self.activation_key.is_some()
    }
}

impl Validate for RegistrationState {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != REGISTRATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "registration_state.schema_version",
                reason: "must match REGISTRATION_CONTRACT_VERSION",
            });
        }
        if let RegistrationStatus::Other(s) = &self.status {
            validate_non_empty("registration_state.status", s)?;
        }
        if let Some(key) = &self.activation_key {
            key.validate()?;
            if !self.status.is_activated() {
                return Err(ContractViolation::InvalidValue {
                    field: "registration_state.activation_key",
                    reason: "may only be present when status is activated",
                });
            }
        }
        if let Some(request_id) = &self.request_id {
            validate_non_empty("registration_state.request_id", request_id)?;
            validate_max_len(
                "registration_state.request_id",
                request_id,
                MAX_REQUEST_ID_LEN,
            )?;
        }
        Ok(())
    }
}

/// Form body for `POST {base}/register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub site_url: String,
    pub product_version: String,
    pub platform_version: String,
    /// JSON-encoded array of active plugin identifiers.
    pub plugins: String,
    pub runtime_version: String,
}

impl RegistrationRequest {
    pub fn from_identity(identity: &InstallationIdentity) -> Self {
        Self {
            site_url: identity.site_url.clone(),
            product_version: identity.product_version.clone(),
            platform_version: identity.platform_version.clone(),
            plugins: identity.active_plugins_json(),
            runtime_version: identity.runtime_version.clone(),
        }
    }

    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("site_url", self.site_url.as_str()),
            ("product_version", self.product_version.as_str()),
            ("platform_version", self.platform_version.as_str()),
            ("plugins", self.plugins.as_str()),
            ("runtime_version", self.runtime_version.as_str()),
        ]
    }
}

/// Form body for `POST {base}/activate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    pub request_id: String,
    pub activation_key: ActivationKey,
}

impl ActivationRequest {
    pub fn v1(request_id: String, activation_key: ActivationKey) -> Result<Self, ContractViolation> {
        let req = Self {
            request_id,
            activation_key,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("request_id", self.request_id.as_str()),
            ("activation_key", self.activation_key.as_str()),
        ]
    }
}

impl Validate for ActivationRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("activation_request.request_id", &self.request_id)?;
        validate_max_len(
            "activation_request.request_id",
            &self.request_id,
            MAX_REQUEST_ID_LEN,
        )?;
        self.activation_key.validate()
    }
}

/// Control-plane reply to `/register` and `/activate`. Every field is optional on the wire
/// and may be a string or a number; a reply without `status` carries no state change.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub request_id: Option<serde_json::Value>,
    #[serde(default)]
    pub activation_key: Option<serde_json::Value>,
}

impl RegistrationResponse {
    pub fn status(&self) -> Option<RegistrationStatus> {
        scalar_text(self.status.as_ref()).as_deref().map(RegistrationStatus::parse)
    }

    /// Request id worth keeping. Blank, non-scalar or over-long ids are dropped.
    pub fn request_id(&self) -> Option<String> {
        scalar_text(self.request_id.as_ref()).filter(|id| id.len() <= MAX_REQUEST_ID_LEN)
    }

    pub fn has_request_id(&self) -> bool {
        scalar_text(self.request_id.as_ref()).is_some()
    }

    /// Raw key text as sent, before sanitizing.
    pub fn activation_key_text(&self) -> Option<String> {
        scalar_text(self.activation_key.as_ref())
    }
}

fn scalar_text(value: Option<&serde_json::Value>) -> Option<String> {
    let text = match value? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_registration_01_status_parse_round_trips_known_values() {
        for s in ["pending", "activated", "rejected"] {
            assert_eq!(RegistrationStatus::parse(s).as_str(), s);
        }
        assert_eq!(RegistrationStatus::parse("  "), RegistrationStatus::Unset);
        assert_eq!(
            RegistrationStatus::parse("suspended"),
            RegistrationStatus::Other("suspended".to_string())
        );
    }

    #[test]
    fn at_registration_02_key_sanitize_strips_markup_and_whitespace() {
        let key = ActivationKey::sanitize("  <b>abc</b>\n123\t ").unwrap();
        assert_eq!(key.as_str(), "abc 123");
        assert_eq!(ActivationKey::sanitize("abc123").unwrap().as_str(), "abc123");
    }

    #[test]
    fn at_registration_03_key_sanitize_rejects_blank_result() {
        assert!(ActivationKey::sanitize("<script></script>").is_none());
        assert!(ActivationKey::sanitize("\u{0007}\u{0000}").is_none());
        assert!(ActivationKey::sanitize("").is_none());
    }

    #[test]
    fn at_registration_04_state_rejects_key_without_activation() {
        let key = ActivationKey::sanitize("abc123").unwrap();
        let err = RegistrationState::v1(RegistrationStatus::Pending, Some(key.clone()), None, None)
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::InvalidValue {
                field: "registration_state.activation_key",
                reason: "may only be present when status is activated",
            }
        );
        let ok = RegistrationState::v1(RegistrationStatus::Activated, Some(key), None, None)
            .unwrap();
        assert!(ok.feature_access_granted());
    }

    #[test]
    fn at_registration_05_activated_without_key_does_not_grant_access() {
        let state = RegistrationState::v1(RegistrationStatus::Activated, None, None, None).unwrap();
        assert!(!state.feature_access_granted());
        assert!(!RegistrationState::unset().feature_access_granted());
    }

    #[test]
    fn at_registration_06_response_tolerates_missing_fields() {
        let parsed: RegistrationResponse = serde_json::from_str(r#"{"request_id":"r-1"}"#).unwrap();
        assert_eq!(parsed.status(), None);
        assert_eq!(parsed.request_id().as_deref(), Some("r-1"));
    }

    #[test]
    fn at_registration_08_response_accepts_numeric_and_odd_fields() {
        let parsed: RegistrationResponse = serde_json::from_str(
            r#"{"status":"activated","request_id":42,"activation_key":"k","extra":[1,2]}"#,
        )
        .unwrap();
        assert_eq!(parsed.status(), Some(RegistrationStatus::Activated));
        assert_eq!(parsed.request_id().as_deref(), Some("42"));
        assert_eq!(parsed.activation_key_text().as_deref(), Some("k"));

        let parsed: RegistrationResponse =
            serde_json::from_str(r#"{"status":"pending","request_id":{"id":1}}"#).unwrap();
        assert_eq!(parsed.status(), Some(RegistrationStatus::Pending));
        assert_eq!(parsed.request_id(), None);
    }

    #[test]
    fn at_registration_09_overlong_request_id_is_dropped_not_fatal() {
        let body = format!(r#"{{"status":"pending","request_id":"{}"}}"#, "r".repeat(300));
        let parsed: RegistrationResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.status(), Some(RegistrationStatus::Pending));
        assert!(parsed.has_request_id());
        assert_eq!(parsed.request_id(), None);
    }

    #[test]
    fn at_registration_10_long_keys_and_statuses_are_kept() {
        let raw = "k".repeat(4_096);
        assert_eq!(ActivationKey::sanitize(&raw).unwrap().as_str(), raw);
        let status = RegistrationStatus::parse(&"s".repeat(200));
        assert!(RegistrationState::v1(status, None, None, None).is_ok());
    }

    #[test]
    fn at_registration_11_unclosed_angle_bracket_is_literal() {
        assert_eq!(ActivationKey::sanitize("abc<def").unwrap().as_str(), "abc<def");
        assert_eq!(ActivationKey::sanitize("a>b<c").unwrap().as_str(), "a>b<c");
        assert_eq!(ActivationKey::sanitize("x<i>y</i>z<").unwrap().as_str(), "xyz<");
    }

    #[test]
    fn at_registration_07_debug_redacts_activation_key() {
        let key = ActivationKey::sanitize("secret-key").unwrap();
        assert!(!format!("{key:?}").contains("secret-key"));
    }
}
