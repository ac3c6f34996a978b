//! BlobStore port - 結果とジョブレコードの永続化先
//!
//! キーは `/` 区切りのパス（例: `job-results/<job-id>.json`）。

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("blob backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// 存在したら true
    async fn delete_blob(&self, key: &str) -> Result<bool, BlobError>;

    /// prefix で始まるキーを辞書順で返す
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
}
