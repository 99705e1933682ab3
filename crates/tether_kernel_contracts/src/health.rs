#![forbid(unsafe_code)]

use crate::installation::InstallationIdentity;

/// Metrics sent with each daily report. Built fresh per report and never stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HealthSnapshot {
    pub runtime_version: String,
    pub platform_version: String,
    pub product_version: String,
    pub active_plugins: Vec<String>,
}

impl HealthSnapshot {
    pub fn from_identity(identity: &InstallationIdentity) -> Self {
        Self {
            runtime_version: identity.runtime_version.clone(),
            platform_version: identity.platform_version.clone(),
            product_version: identity.product_version.clone(),
            active_plugins: identity.active_plugins.clone(),
        }
    }
}

/// Form body for `POST {base}/update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReportRequest {
    pub site_url: String,
    /// JSON-encoded [`HealthSnapshot`].
    pub health_metrics: String,
}

impl HealthReportRequest {
    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("site_url", self.site_url.as_str()),
            ("health_metrics", self.health_metrics.as_str()),
        ]
    }
}
