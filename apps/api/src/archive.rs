use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::models::{Document, EntityKind};
use crate::pipeline::error::PipelineError;

/// Durable copy of every uploaded document, so a failed pipeline can be
/// resumed without the client re-sending the bytes.
#[async_trait]
pub trait DocumentArchive: Send + Sync {
    async fn put(&self, key: &str, document: &Document) -> Result<(), PipelineError>;

    async fn get(&self, key: &str) -> Result<Bytes, PipelineError>;
}

/// Object key for one revision's source document.
pub fn document_key(kind: EntityKind, entity_id: Uuid, revision: i32) -> String {
    format!("documents/{kind}/{entity_id}/r{revision}")
}

pub struct S3Archive {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Archive {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl DocumentArchive for S3Archive {
    async fn put(&self, key: &str, document: &Document) -> Result<(), PipelineError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(document.bytes.clone()))
            .content_type(&document.mime_type)
            .send()
            .await
            .map_err(|e| PipelineError::Archive(format!("S3 upload failed: {e}")))?;

        info!("Archived document to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, PipelineError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::Archive(format!("S3 download failed: {e}")))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Archive(format!("S3 body read failed: {e}")))?;
        Ok(data.into_bytes())
    }
}
