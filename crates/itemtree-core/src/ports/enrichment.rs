//! PartyNameLookup port - パートナー id から名前を引く（キャッシュ付き外部参照）

use async_trait::async_trait;

use crate::domain::RemoteError;

#[async_trait]
pub trait PartyNameLookup: Send + Sync {
    /// 名前が登録されていなければ `Ok(None)`
    async fn lookup(&self, party_id: &str) -> Result<Option<String>, RemoteError>;
}
