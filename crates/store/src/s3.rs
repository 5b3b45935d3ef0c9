//! S3 implementation of ObjectStore.
//!
//! Works against AWS S3 and S3-compatible services (R2, MinIO) through a
//! custom endpoint. All keys are scoped under an optional root prefix.

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;

use gatewarden_core::{
    traits::{ListPage, ListRequest, ObjectStore, ObjectSummary, StoredObject},
    Error, Result,
};

/// S3 storage for sandbox state.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: &str, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        // S3-compatible endpoints generally want path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint.is_some())
            .build();

        Self::new_with_client(Client::from_conf(s3_config), bucket, prefix)
    }

    /// Create with custom client (for testing/custom config).
    pub fn new_with_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        scoped_key(&self.prefix, key)
    }

    fn unscoped<'a>(&self, key: &'a str) -> &'a str {
        unscoped_key(&self.prefix, key)
    }
}

fn scoped_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

fn unscoped_key<'a>(prefix: &str, key: &'a str) -> &'a str {
    if prefix.is_empty() {
        return key;
    }
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(key)
}

fn is_not_found(msg: &str) -> bool {
    msg.contains("NoSuchKey") || msg.contains("NotFound") || msg.contains("404")
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 upload error for {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let content_type = output.content_type.clone();
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::storage(format!("S3 body read error: {}", e)))?
                    .into_bytes();
                Ok(Some(StoredObject {
                    key: key.to_string(),
                    body,
                    content_type,
                }))
            }
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing || is_not_found(&e.to_string()) {
                    Ok(None)
                } else {
                    Err(Error::storage(format!("S3 download error for {}: {}", key, e)))
                }
            }
        }
    }

    async fn list(&self, request: ListRequest) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.key(&request.prefix))
            .set_continuation_token(request.cursor.clone())
            .set_max_keys(request.limit.map(|l| l.min(i32::MAX as usize) as i32))
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 list error for {}: {}", request.prefix, e)))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: self.unscoped(key).to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let truncated = output.is_truncated().unwrap_or(false);
        Ok(ListPage {
            objects,
            truncated,
            cursor: if truncated {
                output.next_continuation_token().map(str::to_string)
            } else {
                None
            },
        })
    }
}
