//! SchemaValidator port - submodel ペイロードのスキーマ検証

use async_trait::async_trait;

use crate::domain::{AspectType, RemoteError};

/// 検証結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(Vec<String>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// SchemaValidator は aspect 型ごとのスキーマでペイロードを検証する
///
/// スキーマ自体が取得できない場合は `RemoteError` を返す。
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate(
        &self,
        aspect: &AspectType,
        payload: &serde_json::Value,
    ) -> Result<ValidationOutcome, RemoteError>;
}
