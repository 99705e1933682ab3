#![forbid(unsafe_code)]

use tether_engines::http_client::{HttpClient, HttpError, HttpRequest};
use tether_engines::version::is_newer_version;
use tether_kernel_contracts::release::{ReleaseDocument, ReleaseInfo, UpdateDescriptor};
use tether_kernel_contracts::{ContractViolation, UnixTimeSecs};
use tether_storage::kv::StorageError;
use tether_storage::repo::ReleaseCacheRepo;

use crate::clock::Clock;
use crate::config::TetherConfig;

pub const RELEASE_ACCEPT_HEADER: &str = "application/vnd.github+json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("release source unreachable: {0}")]
    Transport(#[from] HttpError),
    #[error("release source answered http {status}")]
    UnexpectedStatus { status: u16 },
    #[error("release document unusable: {0}")]
    MalformedDocument(String),
    #[error("release cache write failed: {0}")]
    Storage(#[from] StorageError),
}

impl From<ContractViolation> for ReleaseError {
    fn from(v: ContractViolation) -> Self {
        ReleaseError::MalformedDocument(v.to_string())
    }
}

/// Latest-release lookup with a single shared cache entry.
#[derive(Debug, Clone)]
pub struct ReleaseChecker<H, K> {
    config: TetherConfig,
    http: H,
    clock: K,
}

impl<H, K> ReleaseChecker<H, K>
where
    H: HttpClient,
    K: Clock,
{
    pub fn new(config: TetherConfig, http: H, clock: K) -> Self {
        Self {
            config,
            http,
            clock,
        }
    }

    /// Live cache entry if any, else one fetch. Failures yield `None` and are never cached,
    /// so the next call tries again. An expired entry is never served.
    pub fn latest_release<S>(&self, store: &mut S) -> Option<ReleaseInfo>
    where
        S: ReleaseCacheRepo,
    {
        let now = self.clock.now();
        if let Some(entry) = store.cached_release_blob(now) {
            match parse_release_body(&entry.value, entry.stored_at) {
                Ok(info) => return Some(info),
                Err(err) => {
                    tracing::warn!(error = %err, "cached release entry unreadable; refetching")
                }
            }
        }
        match self.fetch_and_cache(store) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!(
                    repo = self.config.release_repo.as_str(),
                    error = %err,
                    "latest release lookup failed"
                );
                None
            }
        }
    }

    /// Update offer for an installation running `current_version`, if the latest release is newer.
    pub fn update_descriptor<S>(
        &self,
        store: &mut S,
        current_version: &str,
    ) -> Option<UpdateDescriptor>
    where
        S: ReleaseCacheRepo,
    {
        let info = self.latest_release(store)?;
        compute_update_descriptor(&info, current_version)
    }

    fn fetch_and_cache<S>(&self, store: &mut S) -> Result<ReleaseInfo, ReleaseError>
    where
        S: ReleaseCacheRepo,
    {
        let now = self.clock.now();
        let mut request = HttpRequest::get(self.config.latest_release_url(), self.config.http_timeout)
            .header("Accept", RELEASE_ACCEPT_HEADER);
        if let Some(token) = self.config.release_access_token.as_deref() {
            request = request.header("Authorization", &format!("token {token}"));
        }
        let response = self.http.execute(&request)?;
        if !response.is_ok() {
            return Err(ReleaseError::UnexpectedStatus {
                status: response.status,
            });
        }
        let info = parse_release_body(&response.body, now)?;
        store.put_cached_release_blob(response.body, now, self.config.release_cache_ttl_secs)?;
        tracing::debug!(tag = info.tag.as_str(), "latest release cached");
        Ok(info)
    }
}

fn parse_release_body(
    body: &str,
    fetched_at: UnixTimeSecs,
) -> Result<ReleaseInfo, ReleaseError> {
    let doc: ReleaseDocument = serde_json::from_str(body)
        .map_err(|e| ReleaseError::MalformedDocument(e.to_string()))?;
    Ok(ReleaseInfo::from_document(&doc, fetched_at)?)
}

/// `Some` only when the release version is strictly newer than `current_version`.
pub fn compute_update_descriptor(
    info: &ReleaseInfo,
    current_version: &str,
) -> Option<UpdateDescriptor> {
    if !is_newer_version(&info.normalized_version, current_version) {
        return None;
    }
    Some(UpdateDescriptor {
        new_version: info.normalized_version.clone(),
        info_url: info.html_url.clone(),
        download_url: info.download_url.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{config, ScriptedHttpClient, HOUR, T0};
    use tether_engines::http_client::{HttpMethod, TransportErrorKind};
    use tether_storage::kv::TetherStore;

    const RELEASE_V140: &str = r#"{
        "tag_name": "v1.4.0",
        "zipball_url": "https://api.github.com/repos/acme/storefront/zipball/v1.4.0",
        "html_url": "https://github.com/acme/storefront/releases/tag/v1.4.0",
        "assets": []
    }"#;

    fn checker<'a>(
        http: &'a ScriptedHttpClient,
        clock: &'a ManualClock,
    ) -> ReleaseChecker<&'a ScriptedHttpClient, &'a ManualClock> {
        ReleaseChecker::new(config(), http, clock)
    }

    #[test]
    fn at_release_check_01_fetch_sends_accept_and_no_auth_without_token() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();

        let info = checker(&http, &clock).latest_release(&mut store).unwrap();
        assert_eq!(info.tag, "v1.4.0");
        assert_eq!(info.normalized_version, "1.4.0");
        assert_eq!(
            info.download_url.as_deref(),
            Some("https://api.github.com/repos/acme/storefront/zipball/v1.4.0")
        );

        let req = &http.requests()[0];
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.url,
            "https://api.github.com/repos/acme/storefront/releases/latest"
        );
        assert_eq!(req.header_value("accept"), Some(RELEASE_ACCEPT_HEADER));
        assert_eq!(req.header_value("authorization"), None);
    }

    #[test]
    fn at_release_check_02_token_is_sent_when_configured() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let cfg = TetherConfig::mvp_v1(
            "https://cp.example/api",
            "acme/storefront",
            Some("gh-token".to_string()),
        )
        .unwrap();
        let mut store = TetherStore::new_in_memory();

        ReleaseChecker::new(cfg, &http, &clock).latest_release(&mut store);
        assert_eq!(
            http.requests()[0].header_value("Authorization"),
            Some("token gh-token")
        );
    }

    #[test]
    fn at_release_check_03_cache_serves_within_ttl_then_refetches() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();
        let c = checker(&http, &clock);

        assert!(c.latest_release(&mut store).is_some());
        clock.advance_secs(HOUR);
        let cached = c.latest_release(&mut store).unwrap();
        assert_eq!(cached.fetched_at, UnixTimeSecs(T0));
        assert_eq!(http.request_count(), 1);

        clock.set(UnixTimeSecs(T0 + 7 * HOUR));
        http.push_response(200, &RELEASE_V140.replace("1.4.0", "1.5.0"));
        let fresh = c.latest_release(&mut store).unwrap();
        assert_eq!(fresh.normalized_version, "1.5.0");
        assert_eq!(fresh.fetched_at, UnixTimeSecs(T0 + 7 * HOUR));
        assert_eq!(http.request_count(), 2);
    }

    #[test]
    fn at_release_check_04_failed_refetch_is_absent_not_stale() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();
        let c = checker(&http, &clock);

        assert!(c.latest_release(&mut store).is_some());
        clock.advance_secs(7 * HOUR);
        http.push_transport_error(TransportErrorKind::Timeout);
        assert_eq!(c.latest_release(&mut store), None);

        http.push_response(503, "");
        assert_eq!(c.latest_release(&mut store), None);
        assert_eq!(http.request_count(), 3);
    }

    #[test]
    fn at_release_check_05_unusable_documents_are_not_cached() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, r#"{"message":"Not Found"}"#);
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();
        let c = checker(&http, &clock);

        assert_eq!(c.latest_release(&mut store), None);
        assert!(store.cached_release_blob(clock.now()).is_none());
        assert!(c.latest_release(&mut store).is_some());
        assert_eq!(http.request_count(), 2);
    }

    #[test]
    fn at_release_check_06_update_offered_only_for_newer_release() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();
        let c = checker(&http, &clock);

        let offer = c.update_descriptor(&mut store, "1.3.0").unwrap();
        assert_eq!(offer.new_version, "1.4.0");
        assert_eq!(
            offer.info_url.as_deref(),
            Some("https://github.com/acme/storefront/releases/tag/v1.4.0")
        );
        assert_eq!(c.update_descriptor(&mut store, "1.4.0"), None);
        assert_eq!(c.update_descriptor(&mut store, "1.10.0"), None);
        assert_eq!(http.request_count(), 1);
    }

    #[test]
    fn at_release_check_07_corrupt_cache_entry_triggers_refetch() {
        let http = ScriptedHttpClient::new();
        http.push_response(200, RELEASE_V140);
        let clock = ManualClock::new(UnixTimeSecs(T0));
        let mut store = TetherStore::new_in_memory();
        store
            .put_cached_release_blob("not json".to_string(), UnixTimeSecs(T0), 6 * HOUR)
            .unwrap();

        let info = checker(&http, &clock).latest_release(&mut store).unwrap();
        assert_eq!(info.tag, "v1.4.0");
        assert_eq!(http.request_count(), 1);
    }
}
