#![forbid(unsafe_code)]

use tether_engines::http_client::{HttpClient, HttpError, HttpRequest};
use tether_kernel_contracts::health::{HealthReportRequest, HealthSnapshot};
use tether_kernel_contracts::ContractViolation;

use crate::config::TetherConfig;
use crate::probe::InstallationProbe;

pub const HEALTH_REPORT_PATH: &str = "update";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthReportError {
    #[error("installation identity unavailable: {0}")]
    Identity(#[from] ContractViolation),
    #[error("health snapshot encoding failed: {0}")]
    Encoding(String),
    #[error("control plane unreachable: {0}")]
    Transport(#[from] HttpError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReportOutcome {
    /// The request completed. The reply status is not interpreted.
    Delivered { status: u16 },
    Failed(HealthReportError),
}

/// Fire-and-forget daily reporter. Nothing it does touches stored state.
#[derive(Debug, Clone)]
pub struct HealthReporter<H, P> {
    config: TetherConfig,
    http: H,
    probe: P,
}

impl<H, P> HealthReporter<H, P>
where
    H: HttpClient,
    P: InstallationProbe,
{
    pub fn new(config: TetherConfig, http: H, probe: P) -> Self {
        Self {
            config,
            http,
            probe,
        }
    }

    pub fn build_snapshot(&self) -> Result<HealthSnapshot, HealthReportError> {
        let identity = self.probe.identity()?;
        Ok(HealthSnapshot::from_identity(&identity))
    }

    pub fn send_daily_report(&self) -> HealthReportOutcome {
        match self.try_send() {
            Ok(status) => {
                if status == 200 {
                    tracing::debug!(status, "health report delivered");
                } else {
                    tracing::warn!(status, "health report answered with unexpected status");
                }
                HealthReportOutcome::Delivered { status }
            }
            Err(err) => {
                tracing::warn!(error = %err, "health report not delivered");
                HealthReportOutcome::Failed(err)
            }
        }
    }

    fn try_send(&self) -> Result<u16, HealthReportError> {
        let snapshot = self.build_snapshot()?;
        let payload = HealthReportRequest {
            site_url: self.probe.identity()?.site_url,
            health_metrics: serde_json::to_string(&snapshot)
                .map_err(|e| HealthReportError::Encoding(e.to_string()))?,
        };
        let request = HttpRequest::post_form(
            self.config.control_plane_endpoint(HEALTH_REPORT_PATH),
            self.config.http_timeout,
        )
        .form_fields(&payload.form_fields());
        let request = match self.config.control_plane_token.as_deref() {
            Some(token) => request.header("Authorization", &format!("Bearer {token}")),
            None => request,
        };
        Ok(self.http.execute(&request)?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, probe, ScriptedHttpClient};
    use tether_engines::http_client::TransportErrorKind;

    #[test]
    fn at_health_01_report_carries_exactly_four_metrics() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, "");
        let reporter = HealthReporter::new(config(), &http, probe("1.3.0"));

        assert_eq!(
            reporter.send_daily_report(),
            HealthReportOutcome::Delivered { status: 200 }
        );
        let req = &http.requests()[0];
        assert_eq!(req.url, "https://cp.example/api/update");
        assert_eq!(req.form_value("site_url"), Some("https://shop.example"));

        let metrics: serde_json::Value =
            serde_json::from_str(req.form_value("health_metrics").unwrap()).unwrap();
        let obj = metrics.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "active_plugins",
                "platform_version",
                "product_version",
                "runtime_version"
            ]
        );
        assert_eq!(obj["product_version"], "1.3.0");
        assert_eq!(obj["active_plugins"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn at_health_02_non_200_reply_still_counts_as_delivered() {
        let http = ScriptedHttpClient::new();
        http.push_response(502, "bad gateway");
        let reporter = HealthReporter::new(config(), &http, probe("1.3.0"));
        assert_eq!(
            reporter.send_daily_report(),
            HealthReportOutcome::Delivered { status: 502 }
        );
    }

    #[test]
    fn at_health_03_transport_failure_is_reported_not_raised() {
        let http = ScriptedHttpClient::new();
        http.push_transport_error(TransportErrorKind::Dns);
        let reporter = HealthReporter::new(config(), &http, probe("1.3.0"));
        assert!(matches!(
            reporter.send_daily_report(),
            HealthReportOutcome::Failed(HealthReportError::Transport(_))
        ));
    }

    #[test]
    fn at_health_04_snapshot_reflects_current_probe() {
        let http = ScriptedHttpClient::new();
        let reporter = HealthReporter::new(config(), &http, probe("2.0.1"));
        let snapshot = reporter.build_snapshot().unwrap();
        assert_eq!(snapshot.product_version, "2.0.1");
        assert_eq!(snapshot.runtime_version, "8.2.10");
        assert_eq!(http.request_count(), 0);
    }

    #[test]
    fn at_health_05_sent_metrics_match_built_snapshot() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, "");
        let reporter = HealthReporter::new(config(), &http, probe("1.3.0"));

        reporter.send_daily_report();
        let sent: HealthSnapshot =
            serde_json::from_str(http.requests()[0].form_value("health_metrics").unwrap())
                .unwrap();
        assert_eq!(sent, reporter.build_snapshot().unwrap());
    }
}
