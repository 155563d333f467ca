// src/utils/mod.rs
//! Configuration, errors and shared HTTP plumbing

pub mod config;
pub mod errors;
pub mod http;

pub use self::config::FleetConfig;
pub use errors::{Result, WorkerError};
