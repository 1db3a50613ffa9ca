use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::signing::UrlSigner;
use super::{validate_key, ObjectStore, ObjectStoreError, PresignedUrl};

/// Local filesystem object store for development and testing.
///
/// Pre-signed URLs point back at this service's `/storage/*key` route.
pub struct LocalStore {
    base_path: PathBuf,
    signer: UrlSigner,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P, signer: UrlSigner) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path, signer })
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    fn presign(
        &self,
        method: &'static str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        validate_key(key)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ObjectStoreError::Signing(e.to_string()))?;
        let expires_at = chrono::Utc::now() + ttl;
        Ok(PresignedUrl {
            url: self.signer.sign(method, key, expires_at),
            method,
            expires_at,
        })
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn upload_url(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, ObjectStoreError> {
        self.presign("PUT", key, ttl)
    }

    async fn download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        self.presign("GET", key, ttl)
    }
}
