//! InMemoryBlobStore - 開発用の Blob ストレージ
//!
//! # 実装詳細
//! - BTreeMap<String, Vec<u8>> でキー順を保つ（list_keys がソート済みになる）
//! - `set_failing(true)` で全操作を失敗させられる（障害系テスト用）

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::ports::{BlobError, BlobStore};

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BlobError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BlobError::Backend("blob store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.check()?;
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.check()?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete_blob(&self, key: &str) -> Result<bool, BlobError> {
        self.check()?;
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.check()?;
        Ok(self
            .blobs
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
