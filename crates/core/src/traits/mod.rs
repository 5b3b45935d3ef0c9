//! Core traits for Gatewarden.
//!
//! The sandbox backend trait lives in `gatewarden_sandbox`, next to its
//! implementations; the object store contract is shared here because both
//! the sync engine and the store backends depend on it.

pub mod store;

pub use store::*;
