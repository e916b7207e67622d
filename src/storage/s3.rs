use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::core::{EngineError, EngineResult};

use super::ObjectStore;

/// S3-backed object store holding generated XML documents.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(bucket: impl Into<String>) -> anyhow::Result<Self> {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");

        let config = aws_config::from_env().region(region_provider).load().await;

        Ok(S3ObjectStore {
            client: Client::new(&config),
            bucket: bucket.into(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> EngineResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| EngineError::Storage(format!("put {key}: {e}")))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EngineError::Storage(format!("get {key}: {e}")))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| EngineError::Storage(format!("read {key}: {e}")))?;

        Ok(data.to_vec())
    }
}
