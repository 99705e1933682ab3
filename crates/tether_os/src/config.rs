#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use tether_kernel_contracts::release::ReleaseRepoSlug;
use tether_kernel_contracts::ContractViolation;
use url::Url;

pub const ENV_CONTROL_PLANE_URL: &str = "TETHER_CONTROL_PLANE_URL";
pub const ENV_CONTROL_PLANE_TOKEN: &str = "TETHER_CONTROL_PLANE_TOKEN";
pub const ENV_RELEASE_REPO: &str = "TETHER_RELEASE_REPO";
pub const ENV_RELEASE_TOKEN: &str = "TETHER_RELEASE_TOKEN";
pub const ENV_RELEASE_API_BASE: &str = "TETHER_RELEASE_API_BASE";
pub const ENV_HTTP_TIMEOUT_MS: &str = "TETHER_HTTP_TIMEOUT_MS";

pub const DEFAULT_RELEASE_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;
pub const RETRY_THROTTLE_TTL_SECS: u64 = 12 * 60 * 60;
pub const RELEASE_CACHE_TTL_SECS: u64 = 6 * 60 * 60;
pub const HEALTH_REPORT_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const HEALTH_REPORT_FIRST_DELAY_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {var}")]
    Missing { var: &'static str },
    #[error("{var} is not a usable http(s) url: {detail}")]
    InvalidUrl { var: &'static str, detail: String },
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetherConfig {
    pub control_plane_base_url: Url,
    /// Bearer token presented on control-plane calls when set.
    pub control_plane_token: Option<String>,
    pub release_api_base_url: Url,
    pub release_repo: ReleaseRepoSlug,
    /// Absent means unauthenticated, rate-limited access to the release source.
    pub release_access_token: Option<String>,
    pub http_timeout: Duration,
    pub retry_throttle_ttl_secs: u64,
    pub release_cache_ttl_secs: u64,
    pub health_report_interval_secs: u64,
    pub health_report_first_delay_secs: u64,
}

impl TetherConfig {
    pub fn mvp_v1(
        control_plane_base_url: &str,
        release_repo: &str,
        release_access_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            control_plane_base_url: parse_http_url(ENV_CONTROL_PLANE_URL, control_plane_base_url)?,
            control_plane_token: None,
            release_api_base_url: parse_http_url(ENV_RELEASE_API_BASE, DEFAULT_RELEASE_API_BASE)?,
            release_repo: ReleaseRepoSlug::new(release_repo)?,
            release_access_token: release_access_token.and_then(non_blank),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            retry_throttle_ttl_secs: RETRY_THROTTLE_TTL_SECS,
            release_cache_ttl_secs: RELEASE_CACHE_TTL_SECS,
            health_report_interval_secs: HEALTH_REPORT_INTERVAL_SECS,
            health_report_first_delay_secs: HEALTH_REPORT_FIRST_DELAY_SECS,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).and_then(non_blank);
        let control_plane = read(ENV_CONTROL_PLANE_URL).ok_or(ConfigError::Missing {
            var: ENV_CONTROL_PLANE_URL,
        })?;
        let repo = read(ENV_RELEASE_REPO).ok_or(ConfigError::Missing {
            var: ENV_RELEASE_REPO,
        })?;
        let mut config = Self::mvp_v1(&control_plane, &repo, read(ENV_RELEASE_TOKEN))?;
        config.control_plane_token = read(ENV_CONTROL_PLANE_TOKEN);
        if let Some(base) = read(ENV_RELEASE_API_BASE) {
            config.release_api_base_url = parse_http_url(ENV_RELEASE_API_BASE, &base)?;
        }
        if let Some(ms) = read(ENV_HTTP_TIMEOUT_MS)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| (100..=120_000).contains(v))
        {
            config.http_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn control_plane_endpoint(&self, path: &str) -> String {
        join_url(&self.control_plane_base_url, path)
    }

    pub fn latest_release_url(&self) -> String {
        join_url(
            &self.release_api_base_url,
            &format!("repos/{}/releases/latest", self.release_repo.as_str()),
        )
    }
}

fn join_url(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn parse_http_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        var,
        detail: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            var,
            detail: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::InvalidUrl {
            var,
            detail: "must not carry a query or fragment".to_string(),
        });
    }
    Ok(url)
}

pub(crate) fn non_blank(v: String) -> Option<String> {
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
