#![deny(unused)]
//! State persistence for the gateway.
//!
//! Mirrors the gateway's config, workspace and skills directories from the
//! sandbox into an `ObjectStore`, and restores them into a fresh sandbox.
//! A `.last-sync` marker in the store records when the last complete sync
//! finished; restore treats its absence as "no backup".

pub mod engine;
pub mod policy;
pub mod steps;

pub use engine::SyncEngine;
pub use policy::{Exclusion, ExclusionPolicy};
pub use steps::{restore_steps, step_for_key, sync_steps, SyncStep};
