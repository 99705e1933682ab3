#![forbid(unsafe_code)]

use crate::common::{validate_max_len, validate_non_empty};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const INSTALLATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

const MAX_URL_LEN: usize = 2_048;
const MAX_VERSION_LEN: usize = 64;
const MAX_PLUGIN_ID_LEN: usize = 256;
const MAX_ACTIVE_PLUGINS: usize = 1_024;

/// Read-only snapshot of the host installation, taken at payload-build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationIdentity {
    pub schema_version: SchemaVersion,
    pub site_url: String,
    pub product_version: String,
    pub platform_version: String,
    pub runtime_version: String,
    pub active_plugins: Vec<String>,
}

impl InstallationIdentity {
    pub fn v1(
        site_url: String,
        product_version: String,
        platform_version: String,
        runtime_version: String,
        active_plugins: Vec<String>,
    ) -> Result<Self, ContractViolation> {
        let identity = Self {
            schema_version: INSTALLATION_CONTRACT_VERSION,
            site_url,
            product_version,
            platform_version,
            runtime_version,
            active_plugins,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Plugin list encoded the way the control plane expects it: a JSON array in a string.
    pub fn active_plugins_json(&self) -> String {
        serde_json::to_string(&self.active_plugins).unwrap_or_else(|_| "[]".to_string())
    }
}

impl Validate for InstallationIdentity {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != INSTALLATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "installation_identity.schema_version",
                reason: "must match INSTALLATION_CONTRACT_VERSION",
            });
        }
        validate_non_empty("installation_identity.site_url", &self.site_url)?;
        validate_max_len("installation_identity.site_url", &self.site_url, MAX_URL_LEN)?;
        validate_non_empty(
            "installation_identity.product_version",
            &self.product_version,
        )?;
        validate_max_len(
            "installation_identity.product_version",
            &self.product_version,
            MAX_VERSION_LEN,
        )?;
        validate_max_len(
            "installation_identity.platform_version",
            &self.platform_version,
            MAX_VERSION_LEN,
        )?;
        validate_max_len(
            "installation_identity.runtime_version",
            &self.runtime_version,
            MAX_VERSION_LEN,
        )?;
        if self.active_plugins.len() > MAX_ACTIVE_PLUGINS {
            return Err(ContractViolation::TooLong {
                field: "installation_identity.active_plugins",
                max: MAX_ACTIVE_PLUGINS,
                got: self.active_plugins.len(),
            });
        }
        for plugin in &self.active_plugins {
            validate_non_empty("installation_identity.active_plugins", plugin)?;
            validate_max_len(
                "installation_identity.active_plugins",
                plugin,
                MAX_PLUGIN_ID_LEN,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(plugins: Vec<&str>) -> InstallationIdentity {
        InstallationIdentity::v1(
            "https://shop.example".to_string(),
            "1.3.0".to_string(),
            "6.5.2".to_string(),
            "8.2.10".to_string(),
            plugins.into_iter().map(str::to_string).collect(),
        )
        .unwrap()
    }

    #[test]
    fn at_identity_01_rejects_empty_site_url() {
        let err = InstallationIdentity::v1(
            "  ".to_string(),
            "1.0.0".to_string(),
            String::new(),
            String::new(),
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::InvalidValue {
                field: "installation_identity.site_url",
                reason: "must not be empty",
            }
        );
    }

    #[test]
    fn at_identity_02_plugins_encode_as_ordered_json_array() {
        let id = identity(vec!["woocommerce/woocommerce.php", "akismet/akismet.php"]);
        assert_eq!(
            id.active_plugins_json(),
            r#"["woocommerce/woocommerce.php","akismet/akismet.php"]"#
        );
        assert_eq!(identity(vec![]).active_plugins_json(), "[]");
    }

    #[test]
    fn at_identity_03_plugin_json_escapes_quotes() {
        let id = identity(vec!["odd\"name"]);
        assert_eq!(id.active_plugins_json(), r#"["odd\"name"]"#);
    }
}
