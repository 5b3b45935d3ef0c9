//! In-memory object store using DashMap.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use gatewarden_core::{
    traits::{ListPage, ListRequest, ObjectStore, ObjectSummary, StoredObject},
    Result,
};

/// Stored object with metadata.
#[derive(Debug, Clone)]
struct StoredEntry {
    body: Bytes,
    content_type: String,
}

/// In-memory object store for local development and tests.
///
/// Listings are ordered by key and paginated like S3: the cursor is the last
/// key of the previous page.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    /// Thread-safe concurrent hashmap.
    data: DashMap<String, StoredEntry>,
    page_size: usize,
    puts: AtomicUsize,
}

impl InMemoryObjectStore {
    /// Create a new in-memory store with S3's default page size.
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    /// Create a store returning at most `page_size` objects per listing.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            data: DashMap::new(),
            page_size: page_size.max(1),
            puts: AtomicUsize::new(0),
        }
    }

    /// Get the number of stored objects.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Sorted list of every stored key.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Content type recorded for `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|r| r.value().content_type.clone())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.data.insert(
            key.to_string(),
            StoredEntry {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.data.get(key).map(|r| StoredObject {
            key: key.to_string(),
            body: r.value().body.clone(),
            content_type: Some(r.value().content_type.clone()),
        }))
    }

    async fn list(&self, request: ListRequest) -> Result<ListPage> {
        let mut matching: Vec<ObjectSummary> = self
            .data
            .iter()
            .filter(|r| r.key().starts_with(&request.prefix))
            .filter(|r| match &request.cursor {
                Some(cursor) => r.key().as_str() > cursor.as_str(),
                None => true,
            })
            .map(|r| ObjectSummary {
                key: r.key().clone(),
                size: r.value().body.len() as u64,
            })
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let limit = request.limit.unwrap_or(self.page_size).min(self.page_size);
        let truncated = matching.len() > limit;
        matching.truncate(limit);
        let cursor = if truncated {
            matching.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: matching,
            truncated,
            cursor,
        })
    }
}
