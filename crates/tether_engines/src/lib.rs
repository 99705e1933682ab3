#![forbid(unsafe_code)]

pub mod http_client;
pub mod version;
