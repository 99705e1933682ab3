#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod health;
pub mod probe;
pub mod registration;
pub mod release;
pub mod triggers;

#[cfg(test)]
mod test_support;
