#![forbid(unsafe_code)]

pub mod kv;
pub mod repo;
