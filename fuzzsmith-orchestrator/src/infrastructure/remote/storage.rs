//! Object storage for remote run artifacts.
//!
//! Keys are write-once: the submitter uploads sources, the remote build
//! writes logs/corpus/coverage/reproducer, and everything is read back
//! only after the build reports terminal status. A missing object is a
//! normal condition (no reproducer when nothing crashed), so `get`
//! returns `None` instead of failing.

use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("object storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ArtifactStoreError>;

    /// Fetch an object; `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError>;
}

/// S3-backed artifact store using the ambient credential chain.
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub async fn connect(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        Self {
            client: S3Client::new(&config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ArtifactStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| ArtifactStoreError::Storage(e.to_string()))?;
        debug!(bucket = %self.bucket, key, "artifact uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| ArtifactStoreError::Storage(e.to_string()))?;
                Ok(Some(data.into_bytes().to_vec()))
            }
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    debug!(bucket = %self.bucket, key, "artifact absent");
                    Ok(None)
                } else {
                    Err(ArtifactStoreError::Storage(err.to_string()))
                }
            }
        }
    }
}

/// Filesystem-backed store with the same key semantics; used in tests and
/// self-hosted deployments where the "remote" service shares a volume.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ArtifactStoreError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactStoreError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ArtifactStoreError::Storage(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactStoreError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fs_store_round_trips_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        assert!(store.get("exp/job/run.log").await.unwrap().is_none());
        store.put("exp/job/run.log", b"cov: 5".to_vec()).await.unwrap();
        assert_eq!(
            store.get("exp/job/run.log").await.unwrap().unwrap(),
            b"cov: 5".to_vec()
        );
    }
}
