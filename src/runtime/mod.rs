// src/runtime/mod.rs
//! Worker execution runtime
//!
//! This module provides the worker lifecycle and its process supervision:
//!
//! - **Worker Unit**: registration, listening and single-flight job handling
//! - **Worker Pool**: one OS process per worker slot
//! - **Process Manager**: process spawning and signalling
//! - **State**: the explicit worker state machine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  WorkerPool (pool process)                │
//! │     provision identities → spawn one child per slot       │
//! └──────────┬───────────────────┬───────────────────┬───────┘
//!            ▼                   ▼                   ▼
//!     ┌────────────┐      ┌────────────┐      ┌────────────┐
//!     │ WorkerUnit │      │ WorkerUnit │      │ WorkerUnit │
//!     │  slot 0    │      │  slot 1    │      │  slot 2    │
//!     └─────┬──────┘      └────────────┘      └────────────┘
//!           │ register → listen → job → report → ack
//!           ▼
//!   control plane  ·  queue broker  ·  job container
//! ```

pub mod process_manager;
pub mod state;
pub mod worker_pool;
pub mod worker_unit;

// Re-export commonly used types
pub use process_manager::{ProcessManager, SpawnConfig};
pub use state::{StateCell, WorkerState};
pub use worker_pool::{SlotExit, WorkerPool, WorkerProcess};
pub use worker_unit::{Provisioned, WorkerExit, WorkerUnit, EXIT_ABNORMAL, EXIT_USER_STOPPED};
