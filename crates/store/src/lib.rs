#![deny(unused)]
//! Durable object storage for Gatewarden.
//!
//! Sandbox state outlives the sandbox by being copied into an object store.
//! This crate provides the S3 backend used in production and an in-memory
//! backend for development and tests, selected from `StoreConfig`.

pub mod memory;
pub mod s3;

use std::sync::Arc;

use gatewarden_core::{
    config::{StoreBackend, StoreConfig},
    traits::ObjectStore,
    Error, Result,
};

pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

/// Open the configured object store. `Ok(None)` means storage is disabled.
pub async fn open_store(config: &StoreConfig) -> Result<Option<Arc<dyn ObjectStore>>> {
    match config.backend {
        StoreBackend::None => {
            tracing::info!("Object storage disabled; sync and restore will report unavailable");
            Ok(None)
        }
        StoreBackend::Memory => {
            tracing::info!("Initializing In-Memory Object Store");
            Ok(Some(Arc::new(InMemoryObjectStore::new())))
        }
        StoreBackend::S3 => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| Error::config("store.bucket is required for the s3 backend"))?;
            tracing::info!(bucket = %bucket, endpoint = ?config.endpoint, prefix = %config.prefix, "Initializing S3 Object Store");
            let store =
                S3ObjectStore::new(bucket, &config.prefix, config.endpoint.as_deref()).await;
            Ok(Some(Arc::new(store)))
        }
    }
}
