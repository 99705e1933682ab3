#![forbid(unsafe_code)]

use crate::common::{validate_max_len, validate_non_empty};
use crate::{ContractViolation, SchemaVersion, UnixTimeSecs, Validate};

pub const RELEASE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

const MAX_SLUG_LEN: usize = 200;

/// `owner/name` identifier of the repository that publishes releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseRepoSlug(String);

impl ReleaseRepoSlug {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
        let slug = Self(raw.into().trim().trim_matches('/').to_string());
        slug.validate()?;
        Ok(slug)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ReleaseRepoSlug {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_non_empty("release_repo_slug", &self.0)?;
        validate_max_len("release_repo_slug", &self.0, MAX_SLUG_LEN)?;
        let mut parts = self.0.split('/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || parts.next().is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "release_repo_slug",
                reason: "must have the form owner/name",
            });
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
        if !owner.chars().all(allowed) || !name.chars().all(allowed) {
            return Err(ContractViolation::InvalidValue {
                field: "release_repo_slug",
                reason: "may only contain [A-Za-z0-9._-] around the slash",
            });
        }
        Ok(())
    }
}

/// Release document as served by `GET /repos/{slug}/releases/latest`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ReleaseDocument {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Latest-release metadata, either fresh or served from the release cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub schema_version: SchemaVersion,
    pub tag: String,
    pub normalized_version: String,
    pub download_url: Option<String>,
    pub html_url: Option<String>,
    pub fetched_at: UnixTimeSecs,
}

impl ReleaseInfo {
    pub fn from_document(
        doc: &ReleaseDocument,
        fetched_at: UnixTimeSecs,
    ) -> Result<Self, ContractViolation> {
        let tag = doc.tag_name.as_deref().map(str::trim).unwrap_or_default();
        let info = Self {
            schema_version: RELEASE_CONTRACT_VERSION,
            tag: tag.to_string(),
            normalized_version: normalize_release_tag(tag).to_string(),
            download_url: non_blank(doc.download_url.as_deref())
                .or_else(|| non_blank(doc.zipball_url.as_deref())),
            html_url: non_blank(doc.html_url.as_deref()),
            fetched_at,
        };
        info.validate()?;
        Ok(info)
    }
}

impl Validate for ReleaseInfo {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RELEASE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "release_info.schema_version",
                reason: "must match RELEASE_CONTRACT_VERSION",
            });
        }
        validate_non_empty("release_info.tag", &self.tag)?;
        validate_non_empty("release_info.normalized_version", &self.normalized_version)
    }
}

/// Update offer handed to the host's update mechanism.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UpdateDescriptor {
    pub new_version: String,
    pub info_url: Option<String>,
    pub download_url: Option<String>,
}

/// Strips a single leading `v`/`V` from a release tag.
pub fn normalize_release_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
