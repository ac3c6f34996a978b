//! StaticNetwork - 固定データで動くレジストリ / コネクタ / 名前解決
//!
//! # 用途
//! - テストと CLI デモのフィクスチャ
//! - ノードごとの障害注入（descriptor / payload / 名前解決）
//! - 人工的なレイテンシ
//!
//! # 使用例
//! ```ignore
//! let net = StaticNetwork::new("https://registry.example")
//!     .with_item(&root, "vehicle", &[c1.clone(), c2.clone()])
//!     .with_item(&c1, "engine", &[])
//!     .failing_descriptor(&c2, RemoteError::Retryable("503".into()));
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{
    AspectType, BomLifecycle, Descriptor, Direction, NodeId, RemoteError, SubmodelRef,
};
use crate::ports::{DataTransferClient, DescriptorRegistry, PartyNameLookup};

#[derive(Debug, Default)]
pub struct StaticNetwork {
    endpoint: String,
    lifecycle: BomLifecycle,
    descriptors: HashMap<NodeId, Descriptor>,
    /// submodel id → payload
    payloads: HashMap<String, Vec<u8>>,
    party_names: HashMap<String, String>,
    descriptor_failures: HashMap<NodeId, RemoteError>,
    /// (node, aspect) → error
    payload_failures: HashMap<(NodeId, String), RemoteError>,
    party_failures: HashMap<String, RemoteError>,
    latency: Duration,
    node_latency: HashMap<NodeId, Duration>,
    descriptor_calls: Mutex<HashMap<NodeId, u32>>,
}

impl StaticNetwork {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// relationship submodel を配るライフサイクル（デフォルト asBuilt）
    pub fn with_lifecycle(mut self, lifecycle: BomLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// ノードを登録し、子ノードへの relationship submodel を付ける
    pub fn with_item(mut self, node: &NodeId, id_short: &str, children: &[NodeId]) -> Self {
        let aspect = self.lifecycle.relationship_aspect(Direction::Downward);
        let payload = json!({
            "catenaXId": node.as_str(),
            "childItems": children
                .iter()
                .map(|c| json!({ "catenaXId": c.as_str() }))
                .collect::<Vec<_>>(),
        });
        self.descriptor_entry(node).id_short = id_short.to_string();
        self.attach(node, aspect, payload.to_string().into_bytes())
    }

    /// 親ノードへの usage submodel を付ける（上向き探索用）
    pub fn with_parents(mut self, node: &NodeId, id_short: &str, parents: &[NodeId]) -> Self {
        let aspect = self.lifecycle.relationship_aspect(Direction::Upward);
        let payload = json!({
            "catenaXId": node.as_str(),
            "parentItems": parents
                .iter()
                .map(|p| json!({ "catenaXId": p.as_str() }))
                .collect::<Vec<_>>(),
        });
        let descriptor = self.descriptor_entry(node);
        if descriptor.id_short.is_empty() {
            descriptor.id_short = id_short.to_string();
        }
        self.attach(node, aspect, payload.to_string().into_bytes())
    }

    /// データ aspect を追加する
    pub fn with_aspect(self, node: &NodeId, aspect: &str, payload: serde_json::Value) -> Self {
        self.with_raw_aspect(node, aspect, payload.to_string().into_bytes())
    }

    /// 生バイトのまま aspect を追加する（不正 JSON のテスト用）
    pub fn with_raw_aspect(mut self, node: &NodeId, aspect: &str, bytes: Vec<u8>) -> Self {
        self.descriptor_entry(node);
        self.attach(node, AspectType::new(aspect), bytes)
    }

    pub fn with_manufacturer(mut self, node: &NodeId, party_id: &str, name: Option<&str>) -> Self {
        self.descriptor_entry(node).manufacturer_id = Some(party_id.to_string());
        if let Some(name) = name {
            self.party_names.insert(party_id.to_string(), name.to_string());
        }
        self
    }

    pub fn failing_descriptor(mut self, node: &NodeId, err: RemoteError) -> Self {
        self.descriptor_failures.insert(node.clone(), err);
        self
    }

    pub fn failing_payload(mut self, node: &NodeId, aspect: &str, err: RemoteError) -> Self {
        self.payload_failures
            .insert((node.clone(), aspect.to_string()), err);
        self
    }

    pub fn failing_party(mut self, party_id: &str, err: RemoteError) -> Self {
        self.party_failures.insert(party_id.to_string(), err);
        self
    }

    /// 全ての呼び出しに掛かる遅延
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 特定ノードの呼び出しだけに掛かる遅延
    pub fn with_node_latency(mut self, node: &NodeId, latency: Duration) -> Self {
        self.node_latency.insert(node.clone(), latency);
        self
    }

    /// resolve_descriptor が呼ばれた回数
    pub fn descriptor_calls(&self, node: &NodeId) -> u32 {
        self.descriptor_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .copied()
            .unwrap_or(0)
    }

    fn descriptor_entry(&mut self, node: &NodeId) -> &mut Descriptor {
        self.descriptors
            .entry(node.clone())
            .or_insert_with(|| Descriptor {
                node_id: node.clone(),
                id_short: String::new(),
                manufacturer_id: None,
                submodels: Vec::new(),
            })
    }

    fn attach(mut self, node: &NodeId, aspect: AspectType, bytes: Vec<u8>) -> Self {
        let id = format!("{node}#{aspect}");
        let endpoint = format!("{}/{}/{}", self.endpoint, node, aspect);
        let descriptor = self.descriptor_entry(node);
        descriptor.submodels.retain(|s| s.aspect_type != aspect);
        descriptor.submodels.push(SubmodelRef {
            id: id.clone(),
            aspect_type: aspect,
            endpoint,
        });
        self.payloads.insert(id, bytes);
        self
    }

    async fn delay(&self, node: Option<&NodeId>) {
        let latency = node
            .and_then(|n| self.node_latency.get(n))
            .copied()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DescriptorRegistry for StaticNetwork {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn resolve_descriptor(&self, node: &NodeId) -> Result<Descriptor, RemoteError> {
        *self
            .descriptor_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node.clone())
            .or_default() += 1;
        self.delay(Some(node)).await;

        if let Some(err) = self.descriptor_failures.get(node) {
            return Err(err.clone());
        }
        self.descriptors
            .get(node)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("no descriptor for {node}")))
    }
}

#[async_trait]
impl DataTransferClient for StaticNetwork {
    async fn fetch_payload(
        &self,
        node: &NodeId,
        submodel: &SubmodelRef,
    ) -> Result<Vec<u8>, RemoteError> {
        self.delay(Some(node)).await;

        let key = (node.clone(), submodel.aspect_type.as_str().to_string());
        if let Some(err) = self.payload_failures.get(&key) {
            return Err(err.clone());
        }
        self.payloads
            .get(&submodel.id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("no payload for {}", submodel.id)))
    }
}

#[async_trait]
impl PartyNameLookup for StaticNetwork {
    async fn lookup(&self, party_id: &str) -> Result<Option<String>, RemoteError> {
        self.delay(None).await;

        if let Some(err) = self.party_failures.get(party_id) {
            return Err(err.clone());
        }
        Ok(self.party_names.get(party_id).cloned())
    }
}
