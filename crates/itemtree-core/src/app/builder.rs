//! OrchestratorBuilder - JobOrchestrator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 既定値の注入（Clock / IdGenerator / EventSink / JobMetrics は省略可能）

use std::sync::Arc;

use crate::app::delegate::{Collaborators, DelegateChain, RemoteCalls};
use crate::app::metrics::JobMetrics;
use crate::app::orchestrator::{JobOrchestrator, OrchestratorParts};
use crate::app::retry::RetryPolicy;
use crate::app::worker_pool::WorkerPool;
use crate::config::{ConfigError, CoreConfig};
use crate::ports::{
    BlobStore, Clock, DataTransferClient, DescriptorRegistry, EventSink, IdGenerator, JobStore,
    NoopEventSink, PartyNameLookup, SchemaValidator, SystemClock, UlidGenerator,
};

/// OrchestratorBuilder は JobOrchestrator を構築
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(config)
///     .store(Arc::new(InMemoryJobStore::default()))
///     .blob_store(Arc::new(InMemoryBlobStore::new()))
///     .registry(registry)
///     .transfer_client(connector)
///     .validator(Arc::new(AcceptAllValidator))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 必須コラボレータ（store, blob store, registry, transfer client, validator）が欠けていれば BuildError
/// - 設定値は build() 時に検証
/// - ワーカープールを起動するので tokio ランタイム内で呼ぶこと
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: CoreConfig,
    store: Option<Arc<dyn JobStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    registries: Vec<Arc<dyn DescriptorRegistry>>,
    transfer: Option<Arc<dyn DataTransferClient>>,
    validator: Option<Arc<dyn SchemaValidator>>,
    party_names: Option<Arc<dyn PartyNameLookup>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Option<Arc<dyn EventSink>>,
    metrics: Option<Arc<JobMetrics>>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("the orchestrator must be built inside a tokio runtime")]
    NoRuntime,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// レジストリを追加する。複数あれば descriptor 解決で競争させる
    pub fn registry(mut self, registry: Arc<dyn DescriptorRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn transfer_client(mut self, transfer: Arc<dyn DataTransferClient>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn party_names(mut self, lookup: Arc<dyn PartyNameLookup>) -> Self {
        self.party_names = Some(lookup);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Watchdog と共有するカウンタ。省略時は新しく作る
    pub fn metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 検証してからワーカープールを起動し、JobOrchestrator を返す
    pub fn build(self) -> Result<JobOrchestrator, BuildError> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or(BuildError::MissingCollaborator("job store"))?;
        let blobs = self
            .blobs
            .ok_or(BuildError::MissingCollaborator("blob store"))?;
        if self.registries.is_empty() {
            return Err(BuildError::MissingCollaborator("descriptor registry"));
        }
        let transfer = self
            .transfer
            .ok_or(BuildError::MissingCollaborator("data transfer client"))?;
        let validator = self
            .validator
            .ok_or(BuildError::MissingCollaborator("schema validator"))?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));
        let metrics = self.metrics.unwrap_or_default();

        let calls = RemoteCalls {
            retry: RetryPolicy::from_config(&self.config.retry),
            clock: Arc::clone(&clock),
        };
        let chain = DelegateChain::standard(
            Collaborators {
                registries: self.registries,
                transfer,
                validator,
                party_names: self.party_names,
            },
            calls,
            Arc::clone(&ids),
        );
        let pool = WorkerPool::spawn(self.config.expansion.worker_pool_size);

        tracing::info!(
            workers = self.config.expansion.worker_pool_size,
            max_tree_depth = self.config.expansion.max_tree_depth,
            stages = ?chain.stage_names(),
            "orchestrator built"
        );

        Ok(JobOrchestrator::from_parts(OrchestratorParts {
            store,
            blobs,
            chain,
            pool,
            clock,
            ids,
            events,
            metrics,
            max_tree_depth: self.config.expansion.max_tree_depth,
        }))
    }
}
