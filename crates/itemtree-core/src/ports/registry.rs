//! DescriptorRegistry port - ノード id から descriptor を引くレジストリ

use async_trait::async_trait;

use crate::domain::{Descriptor, NodeId, RemoteError};

/// DescriptorRegistry はノード id を descriptor に解決する
///
/// 複数のレジストリが設定された場合、descriptor ステージは全てに同時に問い合わせ、
/// 最初の成功を採用する。
#[async_trait]
pub trait DescriptorRegistry: Send + Sync {
    /// Tombstone に記録するためのエンドポイント表記
    fn endpoint(&self) -> &str;

    async fn resolve_descriptor(&self, node: &NodeId) -> Result<Descriptor, RemoteError>;
}
