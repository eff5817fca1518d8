//! Uptime-check scheduling and multi-region execution engine.
//!
//! The engine periodically probes user-configured endpoints (HTTP or raw
//! TCP), optionally fanning a probe out across remote regional agents,
//! validates responses against declarative rules, and maintains a rolling
//! up/down status per monitor. Incident lifecycle and notification delivery
//! consume the status rows and check events this crate produces; they live
//! outside this crate.

pub mod agent;
pub mod database;
pub mod executor;
pub mod monitoring;
pub mod pool;
pub mod scheduler;
pub mod status;

pub use executor::Executor;
pub use scheduler::{CheckJob, InflightGuard, Scheduler};
