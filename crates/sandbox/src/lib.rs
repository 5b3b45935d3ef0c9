#![deny(unused)]
//! Sandbox backends for Gatewarden.
//!
//! The gateway process lives inside an isolated, possibly ephemeral sandbox.
//! This crate defines the contract the supervisor and the sync engine use to
//! talk to it, and ships two implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  GatewaySupervisor / SyncEngine        │
//! │    ↓ SandboxBackend trait              │
//! ├────────────────────────────────────────┤
//! │  DockerSandbox  (bollard, docker exec) │
//! │  MockSandbox    (in-memory, tests)     │
//! ├────────────────────────────────────────┤
//! │  Container                             │
//! │    gateway process  :18789             │
//! │    /root/.openclaw, /root/clawd        │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gatewarden_sandbox::{DockerSandbox, SandboxBackend};
//!
//! let backend: Arc<dyn SandboxBackend> = Arc::new(DockerSandbox::connect(config.sandbox)?);
//! let processes = backend.list_processes().await?;
//! ```

pub mod docker;
pub mod engine;
pub mod mock;

pub use docker::{DockerSandbox, ExecResult};
pub use engine::{FileEntry, ListFilesOptions, ProcessHandle, SandboxBackend};
pub use mock::MockSandbox;
