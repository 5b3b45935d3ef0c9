//! Core types for Gatewarden.

pub mod process;
pub mod sync;

pub use process::*;
pub use sync::*;
