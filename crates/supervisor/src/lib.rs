#![deny(unused)]
//! Gateway supervision.
//!
//! # Architecture
//!
//! ```text
//!   callers ──► GatewaySupervisor::ensure_ready ──► SingleFlight<ProcessHandle>
//!                    │                                   │
//!                    │                      find_existing / throttle / start
//!                    ▼                                   ▼
//!              ProcessDirectory ◄──── refresh ──── SandboxBackend
//!              (TTL cache, stale fallback)               ▲
//!                    │                                   │
//!              classify / triage / reap ─────── kill ────┘
//!
//!   SyncEngine (gatewarden_sync) ◄── restore before start, deferred restore
//!   BackgroundTasks               ◄── warm-up, deferred restore
//! ```

pub mod classify;
pub mod directory;
pub mod health;
pub mod metrics;
pub mod singleflight;
pub mod supervisor;
pub mod tasks;
pub mod telemetry;

pub use classify::{classify, reap, triage, ProcessKind, Triage};
pub use directory::{DirectoryHealth, ProcessDirectory, ProcessSnapshot};
pub use health::{DegradedReason, GatewayStatus, HealthReporter};
pub use singleflight::SingleFlight;
pub use supervisor::{GatewaySupervisor, GATEWAY_TOKEN_ENV};
pub use tasks::BackgroundTasks;
pub use telemetry::configure_tracing;
