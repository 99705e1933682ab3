#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

/// Wall-clock time in whole seconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct UnixTimeSecs(pub u64);

impl UnixTimeSecs {
    pub fn plus_secs(self, secs: u64) -> Self {
        UnixTimeSecs(self.0.saturating_add(secs))
    }

    pub fn secs_since(self, earlier: UnixTimeSecs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for UnixTimeSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field} exceeds max length {max} (got {got})")]
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    Ok(())
}

pub(crate) fn validate_max_len(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ContractViolation> {
    if value.len() > max {
        return Err(ContractViolation::TooLong {
            field,
            max,
            got: value.len(),
        });
    }
    Ok(())
}
