//! ItemContainer - ジョブ結果のアキュムレータ
//!
//! 各ノードの展開結果（descriptor, 親子関係, submodel, 名前解決, tombstone）を
//! 集合として保持する。`merge` は集合の和なので可換・結合的・冪等であり、
//! 兄弟ノードの完了順序に関係なく最終結果は同じになる。

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::NodeId;
use super::parameter::{AspectType, BomLifecycle, Direction};

/// 1 つの submodel への参照（どこから取得できるか）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmodelRef {
    pub id: String,
    pub aspect_type: AspectType,
    pub endpoint: String,
}

/// Descriptor はノードのメタデータ（レジストリが返す）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Descriptor {
    pub node_id: NodeId,
    pub id_short: String,
    pub manufacturer_id: Option<String>,
    pub submodels: Vec<SubmodelRef>,
}

impl Descriptor {
    /// 指定されたライフサイクル・方向の relationship submodel を探す
    pub fn relationship_ref(&self, lifecycle: BomLifecycle, direction: Direction) -> Option<&SubmodelRef> {
        let name = lifecycle.relationship_aspect_name(direction);
        self.submodels.iter().find(|s| s.aspect_type.as_str() == name)
    }
}

/// 親→子のエッジ
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub parent: NodeId,
    pub child: NodeId,
    pub lifecycle: BomLifecycle,
}

/// 検証済みの submodel ペイロード
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submodel {
    pub node_id: NodeId,
    pub aspect_type: AspectType,
    pub submodel_id: String,
    pub payload: serde_json::Value,
}

impl Submodel {
    fn sort_key(&self) -> (&NodeId, &AspectType, &str) {
        (&self.node_id, &self.aspect_type, &self.submodel_id)
    }
}

// serde_json::Value は Ord を持たないので、シリアライズ結果で比較する
impl Ord for Submodel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.payload.to_string().cmp(&other.payload.to_string()))
    }
}

impl PartialOrd for Submodel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 解決済みのパートナー名（manufacturer id → 名前）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyName {
    pub party_id: String,
    pub name: String,
}

/// 名前解決ができなかった記録（ノードは処理を続ける）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnrichmentGap {
    pub node_id: NodeId,
    pub party_id: String,
    pub reason: String,
}

/// どの処理ステップで失敗したか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessStep {
    #[serde(rename = "descriptor resolution")]
    DescriptorResolution,
    #[serde(rename = "relationship request")]
    RelationshipRequest,
    #[serde(rename = "submodel request")]
    SubmodelRequest,
    #[serde(rename = "submodel validation")]
    SubmodelValidation,
    /// 展開処理そのものが異常終了した（コラボレータの panic など）
    #[serde(rename = "node expansion")]
    NodeExpansion,
}

impl ProcessStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStep::DescriptorResolution => "descriptor resolution",
            ProcessStep::RelationshipRequest => "relationship request",
            ProcessStep::SubmodelRequest => "submodel request",
            ProcessStep::SubmodelValidation => "submodel validation",
            ProcessStep::NodeExpansion => "node expansion",
        }
    }
}

impl fmt::Display for ProcessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失敗の診断情報
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessingError {
    pub process_step: ProcessStep,
    pub retry_counter: u32,
    pub last_attempt: DateTime<Utc>,
    pub error_detail: String,
    /// 集約エラーの場合、全ての原因メッセージ
    pub root_causes: Vec<String>,
}

/// Tombstone は 1 ノードの回復不能な失敗（ジョブは失敗させない）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tombstone {
    pub node_id: NodeId,
    /// ベストエフォート（空のこともある）
    pub endpoint_url: String,
    pub processing_error: ProcessingError,
}

/// ItemContainer はジョブ単位のアキュムレータ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContainer {
    pub descriptors: BTreeSet<Descriptor>,
    pub relationships: BTreeSet<Relationship>,
    pub submodels: BTreeSet<Submodel>,
    pub party_names: BTreeSet<PartyName>,
    pub enrichment_gaps: BTreeSet<EnrichmentGap>,
    pub tombstones: BTreeSet<Tombstone>,
}

impl ItemContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 集合の和を取る（可換・結合的・冪等）
    pub fn merge(&mut self, other: ItemContainer) {
        self.descriptors.extend(other.descriptors);
        self.relationships.extend(other.relationships);
        self.submodels.extend(other.submodels);
        self.party_names.extend(other.party_names);
        self.enrichment_gaps.extend(other.enrichment_gaps);
        self.tombstones.extend(other.tombstones);
    }

    pub fn merged(mut self, other: ItemContainer) -> Self {
        self.merge(other);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
            && self.relationships.is_empty()
            && self.submodels.is_empty()
            && self.party_names.is_empty()
            && self.enrichment_gaps.is_empty()
            && self.tombstones.is_empty()
    }

    pub fn add_descriptor(&mut self, descriptor: Descriptor) {
        self.descriptors.insert(descriptor);
    }

    pub fn add_relationship(&mut self, relationship: Relationship) {
        self.relationships.insert(relationship);
    }

    pub fn add_submodel(&mut self, submodel: Submodel) {
        self.submodels.insert(submodel);
    }

    pub fn add_party_name(&mut self, party_name: PartyName) {
        self.party_names.insert(party_name);
    }

    pub fn add_enrichment_gap(&mut self, gap: EnrichmentGap) {
        self.enrichment_gaps.insert(gap);
    }

    pub fn add_tombstone(&mut self, tombstone: Tombstone) {
        self.tombstones.insert(tombstone);
    }

    pub fn has_descriptor(&self, node_id: &NodeId) -> bool {
        self.descriptors.iter().any(|d| &d.node_id == node_id)
    }

    pub fn tombstones_for<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a Tombstone> {
        self.tombstones.iter().filter(move |t| &t.node_id == node_id)
    }
}
