//! Durable object store traits.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Key/value object storage that outlives the sandbox.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    /// Fetch an object. Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// List one page of objects under a prefix.
    async fn list(&self, request: ListRequest) -> Result<ListPage>;
}

/// A fetched object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl StoredObject {
    /// Body decoded as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Parameters for one `list` call.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    /// Opaque cursor from a previous truncated page.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl ListRequest {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub truncated: bool,
    pub cursor: Option<String>,
}
