#![deny(unused)]
//! Core types, traits, and error definitions for Gatewarden.
//!
//! This crate provides the building blocks shared by the sandbox backend,
//! the object stores, the sync engine and the gateway supervisor.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
