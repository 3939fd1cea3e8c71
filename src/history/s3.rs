use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::{ debug, error };
use crate::history::{ HistoryBackend, StorageError };

/// Conversation documents stored as objects in one bucket.
pub struct S3HistoryBackend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3HistoryBackend {
    pub fn new(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Builds a client from the standard AWS environment (region, credentials chain).
    pub async fn from_env(bucket: &str, prefix: &str) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), bucket, prefix)
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn unavailable(action: &str, err: impl std::fmt::Display) -> StorageError {
    error!("S3 {} failed: {}", action, err);
    StorageError::Unavailable(format!("S3 {} failed: {}", action, err))
}

#[async_trait]
impl HistoryBackend for S3HistoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let object_key = self.object_key(key);
        let output = match
            self.client.get_object().bucket(&self.bucket).key(&object_key).send().await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    debug!("No S3 object at {}/{}", self.bucket, object_key);
                    return Ok(None);
                }
                return Err(unavailable("get_object", aws_sdk_s3::error::DisplayErrorContext(e)));
            }
        };

        let body = output.body
            .collect().await
            .map_err(|e| unavailable("body read", e))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send().await
            .map_err(|e| unavailable("put_object", aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut pages = self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e|
                unavailable("list_objects_v2", aws_sdk_s3::error::DisplayErrorContext(e))
            )?;
            for object in page.contents() {
                let Some(name) = object.key().and_then(|k| k.strip_prefix(self.prefix.as_str())) else {
                    continue;
                };
                if name.ends_with(".json") && !name.contains('/') {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
