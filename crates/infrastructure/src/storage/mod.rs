//! Artifact storage.

pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

/// Storage errors, classified at the policy layer above.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    S3(String),
}

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub size: i64,
}

/// Read-side view of the artifact store the executor needs: whole-object
/// reads for build sources and HEAD for reporting artifact sizes. Writes
/// happen from inside build pods, not from the executor process.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
    async fn head(&self, key: &str) -> Result<ObjectMeta, StorageError>;
}
