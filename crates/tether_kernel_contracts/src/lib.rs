#![forbid(unsafe_code)]

pub mod common;
pub mod health;
pub mod installation;
pub mod registration;
pub mod release;

pub use common::{ContractViolation, SchemaVersion, UnixTimeSecs, Validate};
