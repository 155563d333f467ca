// src/lib.rs
//! Fleet Worker Library
//!
//! Queue-driven workers that run each job in a container and report the
//! outcome to a control-plane API.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **runtime**: worker lifecycle, process pool, process management
//! - **control_plane**: control-plane contract and REST adapter
//! - **container**: container runtime contract, docker adapter, HTTP dispatch
//! - **queue**: subscription contract, HTTP pull and in-memory adapters
//! - **store**: persisted worker identities and credentials
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration, errors and HTTP helpers

// Public module exports
pub mod container;
pub mod control_plane;
pub mod observability;
pub mod queue;
pub mod runtime;
pub mod shutdown;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use control_plane::{ControlPlane, HttpControlPlane, JobSpec, WorkerIdentity};
pub use runtime::worker_pool::WorkerPool;
pub use runtime::worker_unit::{WorkerExit, WorkerUnit};
pub use store::{ConfigStore, StoreFormat};
pub use utils::config::FleetConfig;
pub use utils::errors::{Result, WorkerError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
