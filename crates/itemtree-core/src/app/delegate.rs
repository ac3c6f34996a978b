//! Delegate chain - 1 ノードを固定順のステージで展開する
//!
//! # ステージ（順序固定）
//! 1. **DescriptorStage**: レジストリで descriptor を解決（失敗したら tombstone を残して停止）
//! 2. **EnrichmentStage**: 製造者名の解決（任意、失敗しても止まらない）
//! 3. **RelationshipStage**: 親子関係を取得して子ノードを返す
//! 4. **SubmodelStage**: 要求された aspect を取得・検証して格納
//!
//! ノード単位の失敗は全て Tombstone に変換され、呼び出し側へエラーとして返らない。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::racer::race_first_success;
use crate::app::retry::{Exhausted, RetryPolicy};
use crate::domain::{
    AspectKind, Descriptor, Direction, EnrichmentGap, ItemContainer, JobId, JobParameter, NodeId,
    PartyName, ProcessId, ProcessStep, ProcessingError, RaceFailure, Relationship, RemoteError,
    Submodel, SubmodelRef, Tombstone,
};
use crate::ports::{
    Clock, DataTransferClient, DescriptorRegistry, IdGenerator, PartyNameLookup, SchemaValidator,
    ValidationOutcome,
};

/// 1 ノード分の作業コンテキスト（ステージ間で共有）
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub job_id: JobId,
    pub process_id: ProcessId,
    pub node: NodeId,
    /// ルートが 0
    pub depth: u32,
    pub depth_bound: u32,
    pub parameter: Arc<JobParameter>,
    pub descriptor: Option<Descriptor>,
    pub children: Vec<NodeId>,
    pub container: ItemContainer,
    /// true になったら後続ステージは実行しない
    pub halted: bool,
}

/// 1 ノード展開の成果物
#[derive(Debug, Clone)]
pub struct Expansion {
    pub node: NodeId,
    pub depth: u32,
    pub children: Vec<NodeId>,
    pub container: ItemContainer,
}

#[async_trait]
pub trait ExpansionStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut NodeContext);
}

/// 外部コラボレータ一式
#[derive(Clone)]
pub struct Collaborators {
    pub registries: Vec<Arc<dyn DescriptorRegistry>>,
    pub transfer: Arc<dyn DataTransferClient>,
    pub validator: Arc<dyn SchemaValidator>,
    pub party_names: Option<Arc<dyn PartyNameLookup>>,
}

/// リモート呼び出しの共通部品（リトライ + 時刻）
#[derive(Clone)]
pub struct RemoteCalls {
    pub retry: RetryPolicy,
    pub clock: Arc<dyn Clock>,
}

impl RemoteCalls {
    fn tombstone(
        &self,
        node: &NodeId,
        endpoint_url: impl Into<String>,
        step: ProcessStep,
        failure: &Exhausted<RemoteError>,
    ) -> Tombstone {
        Tombstone {
            node_id: node.clone(),
            endpoint_url: endpoint_url.into(),
            processing_error: ProcessingError {
                process_step: step,
                retry_counter: failure.attempts,
                last_attempt: failure.last_attempt,
                error_detail: failure.error.to_string(),
                root_causes: vec![failure.error.to_string()],
            },
        }
    }

    /// 取得後の失敗（パース・検証）はリトライしないので retry_counter は 1
    fn single_shot_tombstone(
        &self,
        node: &NodeId,
        endpoint_url: impl Into<String>,
        step: ProcessStep,
        detail: String,
        root_causes: Vec<String>,
    ) -> Tombstone {
        Tombstone {
            node_id: node.clone(),
            endpoint_url: endpoint_url.into(),
            processing_error: ProcessingError {
                process_step: step,
                retry_counter: 1,
                last_attempt: self.clock.now(),
                error_detail: detail,
                root_causes,
            },
        }
    }

    async fn fetch(
        &self,
        transfer: &dyn DataTransferClient,
        node: &NodeId,
        submodel: &SubmodelRef,
    ) -> Result<Vec<u8>, Exhausted<RemoteError>> {
        self.retry
            .run(self.clock.as_ref(), || transfer.fetch_payload(node, submodel))
            .await
            .into_result()
    }
}

/// DelegateChain はステージを順に実行する
pub struct DelegateChain {
    stages: Vec<Box<dyn ExpansionStage>>,
    ids: Arc<dyn IdGenerator>,
}

impl DelegateChain {
    pub fn new(stages: Vec<Box<dyn ExpansionStage>>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { stages, ids }
    }

    /// descriptor → enrichment → relationship → submodel の標準構成
    pub fn standard(collaborators: Collaborators, calls: RemoteCalls, ids: Arc<dyn IdGenerator>) -> Self {
        let stages: Vec<Box<dyn ExpansionStage>> = vec![
            Box::new(DescriptorStage {
                registries: collaborators.registries,
                calls: calls.clone(),
            }),
            Box::new(EnrichmentStage {
                lookup: collaborators.party_names,
            }),
            Box::new(RelationshipStage {
                transfer: Arc::clone(&collaborators.transfer),
                calls: calls.clone(),
            }),
            Box::new(SubmodelStage {
                transfer: collaborators.transfer,
                validator: collaborators.validator,
                calls,
            }),
        ];
        Self::new(stages, ids)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn expand(
        &self,
        job_id: JobId,
        node: NodeId,
        depth: u32,
        depth_bound: u32,
        parameter: Arc<JobParameter>,
    ) -> Expansion {
        let mut ctx = NodeContext {
            job_id,
            process_id: self.ids.generate_process_id(),
            node,
            depth,
            depth_bound,
            parameter,
            descriptor: None,
            children: Vec::new(),
            container: ItemContainer::new(),
            halted: false,
        };

        for stage in &self.stages {
            if ctx.halted {
                break;
            }
            tracing::debug!(
                job_id = %ctx.job_id,
                process_id = %ctx.process_id,
                node = %ctx.node,
                stage = stage.name(),
                "running expansion stage"
            );
            stage.process(&mut ctx).await;
        }

        Expansion {
            node: ctx.node,
            depth: ctx.depth,
            children: ctx.children,
            container: ctx.container,
        }
    }
}

/// 全レジストリに同時に問い合わせ、最初の成功を採用する
pub struct DescriptorStage {
    pub registries: Vec<Arc<dyn DescriptorRegistry>>,
    pub calls: RemoteCalls,
}

#[async_trait]
impl ExpansionStage for DescriptorStage {
    fn name(&self) -> &'static str {
        "descriptor"
    }

    async fn process(&self, ctx: &mut NodeContext) {
        let lookups: Vec<_> = self
            .registries
            .iter()
            .map(|registry| {
                let registry = Arc::clone(registry);
                let node = ctx.node.clone();
                let calls = self.calls.clone();
                async move {
                    calls
                        .retry
                        .run(calls.clock.as_ref(), || registry.resolve_descriptor(&node))
                        .await
                        .into_result()
                }
            })
            .collect();

        let endpoints = self
            .registries
            .iter()
            .map(|r| r.endpoint())
            .collect::<Vec<_>>()
            .join(", ");

        match race_first_success(lookups).await {
            Ok(Some(descriptor)) => {
                ctx.container.add_descriptor(descriptor.clone());
                ctx.descriptor = Some(descriptor);
            }
            Ok(None) => {
                let detail = "no descriptor registry configured".to_string();
                tracing::warn!(job_id = %ctx.job_id, node = %ctx.node, "{detail}");
                let tombstone = self.calls.single_shot_tombstone(
                    &ctx.node,
                    endpoints,
                    ProcessStep::DescriptorResolution,
                    detail.clone(),
                    vec![detail],
                );
                ctx.container.add_tombstone(tombstone);
                ctx.halted = true;
            }
            Err(aggregate) => {
                let failed = || aggregate.causes().filter_map(RaceFailure::failed);
                // panic だけで終わった場合も 1 回は試したとみなす
                let retry_counter = failed().map(|c| c.attempts).max().unwrap_or(1);
                let last_attempt = failed()
                    .map(|c| c.last_attempt)
                    .max()
                    .unwrap_or_else(|| self.calls.clock.now());
                let error_detail = describe_lookup_failure(aggregate.primary());
                let tombstone = Tombstone {
                    node_id: ctx.node.clone(),
                    endpoint_url: endpoints,
                    processing_error: ProcessingError {
                        process_step: ProcessStep::DescriptorResolution,
                        retry_counter,
                        last_attempt,
                        error_detail: error_detail.clone(),
                        root_causes: aggregate.causes().map(describe_lookup_failure).collect(),
                    },
                };
                tracing::warn!(
                    job_id = %ctx.job_id,
                    node = %ctx.node,
                    attempts = retry_counter,
                    error = %error_detail,
                    "descriptor resolution failed, recording tombstone"
                );
                ctx.container.add_tombstone(tombstone);
                ctx.halted = true;
            }
        }
    }
}

fn describe_lookup_failure(failure: &RaceFailure<Exhausted<RemoteError>>) -> String {
    match failure {
        RaceFailure::Failed(exhausted) => exhausted.error.to_string(),
        RaceFailure::Panicked(_) => failure.to_string(),
    }
}

/// 製造者 id を名前に解決する（JobParameter で要求されたときだけ）
pub struct EnrichmentStage {
    pub lookup: Option<Arc<dyn PartyNameLookup>>,
}

#[async_trait]
impl ExpansionStage for EnrichmentStage {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    async fn process(&self, ctx: &mut NodeContext) {
        if !ctx.parameter.lookup_party_names {
            return;
        }
        let Some(party_id) = ctx
            .descriptor
            .as_ref()
            .and_then(|d| d.manufacturer_id.clone())
        else {
            return;
        };

        let reason = match &self.lookup {
            None => "party name lookup is not configured".to_string(),
            Some(lookup) => match lookup.lookup(&party_id).await {
                Ok(Some(name)) => {
                    ctx.container.add_party_name(PartyName { party_id, name });
                    return;
                }
                Ok(None) => "no name registered".to_string(),
                Err(err) => err.to_string(),
            },
        };

        tracing::debug!(job_id = %ctx.job_id, node = %ctx.node, %party_id, %reason, "enrichment skipped");
        ctx.container.add_enrichment_gap(EnrichmentGap {
            node_id: ctx.node.clone(),
            party_id,
            reason,
        });
    }
}

/// BOM（childItems）と usage（parentItems）のどちらも受ける
#[derive(Debug, Deserialize)]
struct RelationshipPayload {
    #[serde(rename = "childItems", default)]
    child_items: Vec<LinkedItem>,
    #[serde(rename = "parentItems", default)]
    parent_items: Vec<LinkedItem>,
}

impl RelationshipPayload {
    fn linked(self, direction: Direction) -> Vec<LinkedItem> {
        match direction {
            Direction::Downward => self.child_items,
            Direction::Upward => self.parent_items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkedItem {
    #[serde(rename = "catenaXId")]
    catenax_id: String,
}

/// relationship submodel を取得し、エッジと次に展開するノードを返す
///
/// 下向きは子を、上向き（usage）は親を次のノードにする。
/// エッジは方向に関係なく常に 親→子 で記録する。
pub struct RelationshipStage {
    pub transfer: Arc<dyn DataTransferClient>,
    pub calls: RemoteCalls,
}

#[async_trait]
impl ExpansionStage for RelationshipStage {
    fn name(&self) -> &'static str {
        "relationship"
    }

    async fn process(&self, ctx: &mut NodeContext) {
        if ctx.depth >= ctx.depth_bound {
            tracing::debug!(job_id = %ctx.job_id, node = %ctx.node, depth = ctx.depth, "depth bound reached");
            return;
        }
        let lifecycle = ctx.parameter.lifecycle;
        let direction = ctx.parameter.direction;
        let Some(reference) = ctx
            .descriptor
            .as_ref()
            .and_then(|d| d.relationship_ref(lifecycle, direction))
            .cloned()
        else {
            return;
        };

        let bytes = match self.calls.fetch(self.transfer.as_ref(), &ctx.node, &reference).await {
            Ok(bytes) => bytes,
            Err(failure) => {
                tracing::warn!(job_id = %ctx.job_id, node = %ctx.node, error = %failure, "relationship request failed");
                let tombstone = self.calls.tombstone(
                    &ctx.node,
                    reference.endpoint.clone(),
                    ProcessStep::RelationshipRequest,
                    &failure,
                );
                ctx.container.add_tombstone(tombstone);
                return;
            }
        };

        let payload: RelationshipPayload = match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(err) => {
                let detail = format!("malformed relationship payload: {err}");
                tracing::warn!(job_id = %ctx.job_id, node = %ctx.node, %detail);
                let tombstone = self.calls.single_shot_tombstone(
                    &ctx.node,
                    reference.endpoint.clone(),
                    ProcessStep::RelationshipRequest,
                    detail.clone(),
                    vec![detail],
                );
                ctx.container.add_tombstone(tombstone);
                return;
            }
        };

        let mut malformed = Vec::new();
        for item in payload.linked(direction) {
            match NodeId::parse(item.catenax_id) {
                Ok(next) => {
                    let (parent, child) = match direction {
                        Direction::Downward => (ctx.node.clone(), next.clone()),
                        Direction::Upward => (next.clone(), ctx.node.clone()),
                    };
                    ctx.container.add_relationship(Relationship {
                        parent,
                        child,
                        lifecycle,
                    });
                    if !ctx.children.contains(&next) {
                        ctx.children.push(next);
                    }
                }
                Err(err) => malformed.push(err.to_string()),
            }
        }

        if !malformed.is_empty() {
            let side = match direction {
                Direction::Downward => "child",
                Direction::Upward => "parent",
            };
            let detail = format!("{} {side} reference(s) could not be parsed", malformed.len());
            tracing::warn!(job_id = %ctx.job_id, node = %ctx.node, %detail);
            let tombstone = self.calls.single_shot_tombstone(
                &ctx.node,
                reference.endpoint,
                ProcessStep::RelationshipRequest,
                detail,
                malformed,
            );
            ctx.container.add_tombstone(tombstone);
        }
    }
}

/// 要求された data aspect を取得・検証して格納する
pub struct SubmodelStage {
    pub transfer: Arc<dyn DataTransferClient>,
    pub validator: Arc<dyn SchemaValidator>,
    pub calls: RemoteCalls,
}

impl SubmodelStage {
    async fn collect(&self, ctx: &NodeContext, reference: &SubmodelRef) -> Result<Submodel, Tombstone> {
        let node = &ctx.node;
        let bytes = self
            .calls
            .fetch(self.transfer.as_ref(), node, reference)
            .await
            .map_err(|failure| {
                self.calls.tombstone(
                    node,
                    reference.endpoint.clone(),
                    ProcessStep::SubmodelRequest,
                    &failure,
                )
            })?;

        let invalid = |detail: String, causes: Vec<String>| {
            self.calls.single_shot_tombstone(
                node,
                reference.endpoint.clone(),
                ProcessStep::SubmodelValidation,
                detail,
                causes,
            )
        };

        let payload: serde_json::Value = serde_json::from_slice(&bytes).map_err(|err| {
            let detail = format!("{} payload is not valid JSON: {err}", reference.aspect_type);
            invalid(detail.clone(), vec![detail])
        })?;

        match self.validator.validate(&reference.aspect_type, &payload).await {
            Ok(ValidationOutcome::Valid) => Ok(Submodel {
                node_id: node.clone(),
                aspect_type: reference.aspect_type.clone(),
                submodel_id: reference.id.clone(),
                payload,
            }),
            Ok(ValidationOutcome::Invalid(errors)) => Err(invalid(
                format!("{} payload failed schema validation", reference.aspect_type),
                errors,
            )),
            Err(err) => {
                let detail = format!("schema for {} unavailable: {err}", reference.aspect_type);
                Err(invalid(detail.clone(), vec![detail]))
            }
        }
    }
}

#[async_trait]
impl ExpansionStage for SubmodelStage {
    fn name(&self) -> &'static str {
        "submodel"
    }

    async fn process(&self, ctx: &mut NodeContext) {
        let Some(descriptor) = ctx.descriptor.clone() else {
            return;
        };

        let wanted: Vec<SubmodelRef> = descriptor
            .submodels
            .into_iter()
            .filter(|s| {
                s.aspect_type.kind() == AspectKind::Data && ctx.parameter.wants_aspect(&s.aspect_type)
            })
            .collect();
        for reference in &wanted {
            match self.collect(ctx, reference).await {
                Ok(submodel) => ctx.container.add_submodel(submodel),
                Err(tombstone) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        node = %ctx.node,
                        aspect = %reference.aspect_type,
                        step = %tombstone.processing_error.process_step,
                        "submodel collection failed"
                    );
                    ctx.container.add_tombstone(tombstone);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BomLifecycle, Depth};
    use crate::impls::{AcceptAllValidator, RequiredFieldsValidator, StaticNetwork};
    use crate::ports::{SystemClock, UlidGenerator};
    use serde_json::json;
    use std::time::Duration;
    use ulid::Ulid;

    fn node(n: u64) -> NodeId {
        NodeId::parse(format!("urn:uuid:00000000-0000-0000-0000-{n:012}")).unwrap()
    }

    fn calls(max_attempts: u32) -> RemoteCalls {
        RemoteCalls {
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(1), 1.0),
            clock: Arc::new(SystemClock),
        }
    }

    fn chain_with(
        registries: Vec<Arc<dyn DescriptorRegistry>>,
        net: Arc<StaticNetwork>,
        validator: Arc<dyn SchemaValidator>,
    ) -> DelegateChain {
        DelegateChain::standard(
            Collaborators {
                registries,
                transfer: net.clone(),
                validator,
                party_names: Some(net),
            },
            calls(3),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    fn chain(net: StaticNetwork) -> (DelegateChain, Arc<StaticNetwork>) {
        let net = Arc::new(net);
        let chain = chain_with(
            vec![net.clone() as Arc<dyn DescriptorRegistry>],
            net.clone(),
            Arc::new(AcceptAllValidator),
        );
        (chain, net)
    }

    fn param(root: NodeId) -> Arc<JobParameter> {
        Arc::new(JobParameter::new(root).with_depth(Depth::Bounded(5)))
    }

    fn job_id() -> JobId {
        JobId::from_ulid(Ulid::new())
    }

    #[test]
    fn standard_chain_has_fixed_order() {
        let (chain, _) = chain(StaticNetwork::new("r"));
        assert_eq!(
            chain.stage_names(),
            vec!["descriptor", "enrichment", "relationship", "submodel"]
        );
    }

    #[tokio::test]
    async fn expands_descriptor_children_and_aspects() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_item(&node(1), "vehicle", &[node(2), node(3)])
                .with_aspect(&node(1), "SerialPart", json!({ "sn": "V1" })),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;

        assert_eq!(exp.children, vec![node(2), node(3)]);
        assert!(exp.container.has_descriptor(&node(1)));
        assert_eq!(exp.container.relationships.len(), 2);
        assert_eq!(exp.container.submodels.len(), 1);
        assert!(exp.container.tombstones.is_empty());
    }

    #[tokio::test]
    async fn descriptor_failure_halts_with_tombstone() {
        let (chain, net) = chain(
            StaticNetwork::new("https://registry.example")
                .with_item(&node(1), "ghost", &[node(2)])
                .failing_descriptor(&node(1), RemoteError::Retryable("503".into())),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;

        assert!(exp.children.is_empty());
        assert!(exp.container.relationships.is_empty());
        let tombstone = exp.container.tombstones.iter().next().unwrap();
        assert_eq!(
            tombstone.processing_error.process_step,
            ProcessStep::DescriptorResolution
        );
        assert_eq!(tombstone.processing_error.retry_counter, 3);
        assert_eq!(tombstone.endpoint_url, "https://registry.example");
        assert_eq!(net.descriptor_calls(&node(1)), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let (chain, net) = chain(StaticNetwork::new("r"));
        let exp = chain.expand(job_id(), node(7), 0, 5, param(node(7))).await;

        let tombstone = exp.container.tombstones.iter().next().unwrap();
        assert_eq!(tombstone.processing_error.retry_counter, 1);
        assert_eq!(net.descriptor_calls(&node(7)), 1);
    }

    #[tokio::test]
    async fn fastest_registry_wins_and_all_endpoints_are_listed_on_failure() {
        let slow = Arc::new(
            StaticNetwork::new("https://slow.example")
                .with_item(&node(1), "from-slow", &[])
                .with_latency(Duration::from_millis(200)),
        );
        let fast = Arc::new(StaticNetwork::new("https://fast.example").with_item(&node(1), "from-fast", &[]));
        let chain = chain_with(
            vec![
                slow.clone() as Arc<dyn DescriptorRegistry>,
                fast.clone() as Arc<dyn DescriptorRegistry>,
            ],
            fast.clone(),
            Arc::new(AcceptAllValidator),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;
        let descriptor = exp.container.descriptors.iter().next().unwrap();
        assert_eq!(descriptor.id_short, "from-fast");

        let exp = chain.expand(job_id(), node(9), 0, 5, param(node(9))).await;
        let tombstone = exp.container.tombstones.iter().next().unwrap();
        assert_eq!(
            tombstone.endpoint_url,
            "https://slow.example, https://fast.example"
        );
        assert_eq!(tombstone.processing_error.root_causes.len(), 2);
    }

    #[tokio::test]
    async fn depth_bound_skips_relationships() {
        let (chain, _) = chain(StaticNetwork::new("r").with_item(&node(1), "leaf", &[node(2)]));

        let exp = chain.expand(job_id(), node(1), 2, 2, param(node(1))).await;

        assert!(exp.children.is_empty());
        assert!(exp.container.relationships.is_empty());
        assert!(exp.container.has_descriptor(&node(1)));
    }

    #[tokio::test]
    async fn relationship_uses_requested_lifecycle() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_lifecycle(BomLifecycle::AsPlanned)
                .with_item(&node(1), "planned", &[node(2)]),
        );
        let built = param(node(1));
        let exp = chain.expand(job_id(), node(1), 0, 5, built).await;
        assert!(exp.children.is_empty());

        let planned = Arc::new(JobParameter::new(node(1)).with_depth(Depth::Bounded(5)).with_lifecycle(BomLifecycle::AsPlanned));
        let exp = chain.expand(job_id(), node(1), 0, 5, planned).await;
        assert_eq!(exp.children, vec![node(2)]);
        assert!(exp.container.relationships.iter().all(|r| r.lifecycle == BomLifecycle::AsPlanned));
    }

    #[tokio::test]
    async fn upward_expansion_follows_usage_to_parents() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_item(&node(3), "bolt", &[node(9)])
                .with_parents(&node(3), "bolt", &[node(1), node(2)]),
        );
        let upward = Arc::new(
            JobParameter::new(node(3))
                .with_depth(Depth::Bounded(5))
                .with_direction(Direction::Upward),
        );

        let exp = chain.expand(job_id(), node(3), 0, 5, upward).await;

        assert_eq!(exp.children, vec![node(1), node(2)]);
        let edges: Vec<_> = exp
            .container
            .relationships
            .iter()
            .map(|r| (r.parent.clone(), r.child.clone()))
            .collect();
        assert_eq!(edges, vec![(node(1), node(3)), (node(2), node(3))]);
        assert!(exp.container.tombstones.is_empty());

        // 下向きの childItems は上向き探索では辿らない
        let downward = chain.expand(job_id(), node(3), 0, 5, param(node(3))).await;
        assert_eq!(downward.children, vec![node(9)]);
    }

    #[tokio::test]
    async fn upward_expansion_without_usage_aspect_stops() {
        let (chain, _) = chain(StaticNetwork::new("r").with_item(&node(1), "vehicle", &[node(2)]));
        let upward = Arc::new(JobParameter::new(node(1)).with_direction(Direction::Upward));

        let exp = chain.expand(job_id(), node(1), 0, 5, upward).await;

        assert!(exp.children.is_empty());
        assert!(exp.container.relationships.is_empty());
        assert!(exp.container.has_descriptor(&node(1)));
    }

    struct PanickingRegistry;

    #[async_trait]
    impl DescriptorRegistry for PanickingRegistry {
        fn endpoint(&self) -> &str {
            "https://broken.example"
        }

        async fn resolve_descriptor(&self, _node: &NodeId) -> Result<Descriptor, RemoteError> {
            panic!("registry client bug")
        }
    }

    #[tokio::test]
    async fn panicking_registry_is_recorded_as_its_own_failure() {
        let net = Arc::new(StaticNetwork::new("r").with_item(&node(1), "vehicle", &[]));
        let chain = chain_with(
            vec![Arc::new(PanickingRegistry) as Arc<dyn DescriptorRegistry>],
            net,
            Arc::new(AcceptAllValidator),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;

        let tombstone = exp.container.tombstones.iter().next().unwrap();
        let error = &tombstone.processing_error;
        assert_eq!(error.process_step, ProcessStep::DescriptorResolution);
        assert_ne!(error.error_detail, "no descriptor registry configured");
        assert_eq!(error.error_detail, "operation panicked: registry client bug");
        assert_eq!(error.retry_counter, 1);
        assert_eq!(tombstone.endpoint_url, "https://broken.example");
    }

    #[tokio::test]
    async fn panicking_registry_does_not_hide_a_healthy_one() {
        let net = Arc::new(StaticNetwork::new("r").with_item(&node(1), "vehicle", &[]));
        let chain = chain_with(
            vec![
                Arc::new(PanickingRegistry) as Arc<dyn DescriptorRegistry>,
                net.clone() as Arc<dyn DescriptorRegistry>,
            ],
            net,
            Arc::new(AcceptAllValidator),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;
        assert!(exp.container.has_descriptor(&node(1)));
        assert!(exp.container.tombstones.is_empty());
    }

    #[tokio::test]
    async fn relationship_fetch_failure_keeps_descriptor() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_item(&node(1), "a", &[node(2)])
                .failing_payload(&node(1), "SingleLevelBomAsBuilt", RemoteError::Fatal("denied".into())),
        );
        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;

        assert!(exp.container.has_descriptor(&node(1)));
        assert!(exp.children.is_empty());
        let tombstone = exp.container.tombstones.iter().next().unwrap();
        assert_eq!(tombstone.processing_error.process_step, ProcessStep::RelationshipRequest);
    }

    #[tokio::test]
    async fn invalid_submodel_becomes_tombstone_without_blocking_siblings() {
        let net = Arc::new(
            StaticNetwork::new("r")
                .with_item(&node(1), "a", &[node(2)])
                .with_aspect(&node(1), "SerialPart", json!({ "sn": "1" }))
                .with_aspect(&node(1), "Batch", json!({ "wrong": true }))
                .with_raw_aspect(&node(1), "Broken", b"{oops".to_vec()),
        );
        let validator = RequiredFieldsValidator::new().require("Batch", ["batchId"]);
        let chain = chain_with(
            vec![net.clone() as Arc<dyn DescriptorRegistry>],
            net.clone(),
            Arc::new(validator),
        );

        let exp = chain.expand(job_id(), node(1), 0, 5, param(node(1))).await;

        assert_eq!(exp.children, vec![node(2)]);
        assert_eq!(exp.container.submodels.len(), 1);
        let steps: Vec<_> = exp
            .container
            .tombstones
            .iter()
            .map(|t| t.processing_error.process_step)
            .collect();
        assert_eq!(steps, vec![ProcessStep::SubmodelValidation; 2]);
        let batch = exp
            .container
            .tombstones
            .iter()
            .find(|t| t.processing_error.root_causes.iter().any(|c| c.contains("batchId")))
            .unwrap();
        assert_eq!(batch.processing_error.retry_counter, 1);
    }

    #[tokio::test]
    async fn aspect_filter_limits_collection() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_item(&node(1), "a", &[])
                .with_aspect(&node(1), "SerialPart", json!({}))
                .with_aspect(&node(1), "Batch", json!({})),
        );
        let parameter = Arc::new(JobParameter::new(node(1)).with_aspects(["Batch"]));
        let exp = chain.expand(job_id(), node(1), 0, 1, parameter).await;

        let aspects: Vec<_> = exp.container.submodels.iter().map(|s| s.aspect_type.as_str()).collect();
        assert_eq!(aspects, vec!["Batch"]);
    }

    #[tokio::test]
    async fn enrichment_failures_are_recorded_as_gaps() {
        let (chain, _) = chain(
            StaticNetwork::new("r")
                .with_item(&node(1), "a", &[])
                .with_manufacturer(&node(1), "BPNL1", Some("ACME"))
                .with_item(&node(2), "b", &[])
                .with_manufacturer(&node(2), "BPNL2", None)
                .with_item(&node(3), "c", &[])
                .with_manufacturer(&node(3), "BPNL3", None)
                .failing_party("BPNL3", RemoteError::Retryable("cache down".into())),
        );
        let with_names = |n| Arc::new(JobParameter::new(node(n)).with_party_names(true));

        let exp = chain.expand(job_id(), node(1), 0, 1, with_names(1)).await;
        assert_eq!(exp.container.party_names.iter().next().map(|p| p.name.as_str()), Some("ACME"));

        let exp = chain.expand(job_id(), node(2), 0, 1, with_names(2)).await;
        assert_eq!(exp.container.enrichment_gaps.len(), 1);
        assert!(exp.container.has_descriptor(&node(2)));

        let exp = chain.expand(job_id(), node(3), 0, 1, with_names(3)).await;
        let gap = exp.container.enrichment_gaps.iter().next().unwrap();
        assert!(gap.reason.contains("cache down"));
        assert!(exp.container.tombstones.is_empty());

        let exp = chain.expand(job_id(), node(1), 0, 1, param(node(1))).await;
        assert!(exp.container.party_names.is_empty());
    }
}
