#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;

use tether_kernel_contracts::installation::InstallationIdentity;
use tether_kernel_contracts::ContractViolation;

use crate::config::non_blank;

pub const ENV_SITE_URL: &str = "TETHER_SITE_URL";
pub const ENV_PRODUCT_VERSION: &str = "TETHER_PRODUCT_VERSION";
pub const ENV_PLATFORM_VERSION: &str = "TETHER_PLATFORM_VERSION";
pub const ENV_RUNTIME_VERSION: &str = "TETHER_RUNTIME_VERSION";
pub const ENV_ACTIVE_PLUGINS: &str = "TETHER_ACTIVE_PLUGINS";

/// Source of the host's current installation facts. Read each time a payload is built.
pub trait InstallationProbe {
    fn identity(&self) -> Result<InstallationIdentity, ContractViolation>;
}

impl<T: InstallationProbe + ?Sized> InstallationProbe for &T {
    fn identity(&self) -> Result<InstallationIdentity, ContractViolation> {
        (**self).identity()
    }
}

impl<T: InstallationProbe + ?Sized> InstallationProbe for Arc<T> {
    fn identity(&self) -> Result<InstallationIdentity, ContractViolation> {
        (**self).identity()
    }
}

/// Identity fixed at process start, e.g. from the sidecar's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticInstallationProbe {
    identity: InstallationIdentity,
}

impl StaticInstallationProbe {
    pub fn new(identity: InstallationIdentity) -> Self {
        Self { identity }
    }

    pub fn from_env() -> Result<Self, ContractViolation> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContractViolation>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).and_then(non_blank).unwrap_or_default();
        let active_plugins = read(ENV_ACTIVE_PLUGINS)
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let identity = InstallationIdentity::v1(
            read(ENV_SITE_URL),
            read(ENV_PRODUCT_VERSION),
            read(ENV_PLATFORM_VERSION),
            read(ENV_RUNTIME_VERSION),
            active_plugins,
        )?;
        Ok(Self { identity })
    }
}

impl InstallationProbe for StaticInstallationProbe {
    fn identity(&self) -> Result<InstallationIdentity, ContractViolation> {
        Ok(self.identity.clone())
    }
}
