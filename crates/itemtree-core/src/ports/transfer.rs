//! DataTransferClient port - コネクタとの契約交渉とデータ転送
//!
//! 交渉プロトコルの状態はコアからは見えない。成功/失敗とリトライ可否だけを返す。

use async_trait::async_trait;

use crate::domain::{NodeId, RemoteError, SubmodelRef};

#[async_trait]
pub trait DataTransferClient: Send + Sync {
    async fn fetch_payload(&self, node: &NodeId, submodel: &SubmodelRef)
    -> Result<Vec<u8>, RemoteError>;
}
