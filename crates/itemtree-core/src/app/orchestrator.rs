//! JobOrchestrator - ジョブの状態機械を駆動する
//!
//! # フロー
//! 1. `create_job`: パラメータ検証 → INITIAL で永続化
//! 2. `start_job`: IN_PROGRESS へ遷移、ルートをキューに積み、ワーカープールへ投入
//! 3. 各ノードの展開結果をマージし、子ノードを（深さ制限と訪問済み集合で絞って）キューへ
//! 4. キューが空かつ実行中の展開が 0 になったら
//!    TRANSFERS_FINISHED → 結果 Blob を保存 → COMPLETED
//!
//! ノード単位の失敗は Tombstone になるだけで、ジョブを ERROR にしない。
//! ERROR になるのはキャンセル、タイムアウト（Watchdog）、ストア障害などジョブ単位の失敗のみ。
//!
//! # 遅れて届いた結果
//! マージ前に必ずストア上の状態を確認し、IN_PROGRESS でなければ結果を捨てる。
//! 結果が二度と届かないジョブ（展開が返らないままタイムアウトしたもの）は
//! `sweep_inactive` が作業状態ごと片付ける。
//!
//! # panic
//! 展開は別タスクで実行し、panic したノードは NodeExpansion の Tombstone になる。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::app::delegate::{DelegateChain, Expansion};
use crate::app::metrics::{JobMetrics, JobMetricsSnapshot};
use crate::app::ticker::{TickerHandle, spawn_ticker};
use crate::app::worker_pool::{WorkItem, WorkerPool, panic_message};
use crate::domain::{
    DomainEvent, ItemContainer, Job, JobErrorKind, JobHandle, JobId, JobParameter, JobResult,
    JobState, NodeId, ProcessStep, ProcessingError, Tombstone, TransitionError, ValidationError,
};
use crate::ports::{BlobError, BlobStore, Clock, EventSink, IdGenerator, JobStore, StoreError};

/// 結果 Blob のキー prefix
pub const RESULT_PREFIX: &str = "job-results/";

pub fn result_key(job_id: JobId) -> String {
    format!("{RESULT_PREFIX}{job_id}.json")
}

/// 呼び出し側（API 層）へ返すエラー
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid job parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {job_id} is not finished yet (state {state})")]
    NotReady { job_id: JobId, state: JobState },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone)]
struct QueuedNode {
    node: NodeId,
    depth: u32,
}

/// 実行中ジョブの作業状態（Orchestrator だけが持つ）
#[derive(Debug)]
struct MultiTransferJob {
    parameter: Arc<JobParameter>,
    depth_bound: u32,
    queue: VecDeque<QueuedNode>,
    /// キューに積んだことのあるノード（展開済み + キュー中）
    visited: HashSet<NodeId>,
    container: ItemContainer,
    /// 投入済みでまだマージされていない展開の数
    outstanding: usize,
}

impl MultiTransferJob {
    fn new(parameter: Arc<JobParameter>, depth_bound: u32) -> Self {
        let root = parameter.root.clone();
        Self {
            parameter,
            depth_bound,
            queue: VecDeque::from([QueuedNode {
                node: root.clone(),
                depth: 0,
            }]),
            visited: HashSet::from([root]),
            container: ItemContainer::new(),
            outstanding: 0,
        }
    }

    fn absorb(&mut self, expansion: Expansion) {
        self.container.merge(expansion.container);
        let child_depth = expansion.depth + 1;
        if child_depth > self.depth_bound {
            return;
        }
        for child in expansion.children {
            if self.visited.insert(child.clone()) {
                self.queue.push_back(QueuedNode {
                    node: child,
                    depth: child_depth,
                });
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.outstanding == 0
    }
}

/// Orchestrator の構成部品（OrchestratorBuilder が組み立てる）
pub(crate) struct OrchestratorParts {
    pub store: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub chain: DelegateChain,
    pub pool: WorkerPool,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<JobMetrics>,
    pub max_tree_depth: u32,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    chain: DelegateChain,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    metrics: Arc<JobMetrics>,
    max_tree_depth: u32,
    active: Mutex<HashMap<JobId, MultiTransferJob>>,
}

impl JobOrchestrator {
    pub(crate) fn from_parts(parts: OrchestratorParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: parts.store,
                blobs: parts.blobs,
                chain: parts.chain,
                pool: parts.pool,
                clock: parts.clock,
                ids: parts.ids,
                events: parts.events,
                metrics: parts.metrics,
                max_tree_depth: parts.max_tree_depth,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// パラメータを検証し、INITIAL のジョブを永続化する
    pub async fn create_job(&self, parameter: JobParameter) -> Result<JobHandle, JobError> {
        let inner = &self.inner;
        parameter.validate(inner.max_tree_depth)?;

        let now = inner.clock.now();
        let mut job = Job::new(inner.ids.generate_job_id(), parameter, now);
        job.transition(JobState::Initial, now)?;
        let handle = JobHandle {
            job_id: job.id,
            created_on: now,
        };
        let root = job.parameter.root.clone();
        inner.store.create(job).await?;
        inner.metrics.record_created();

        tracing::info!(job_id = %handle.job_id, %root, "job created");
        Ok(handle)
    }

    /// INITIAL → IN_PROGRESS に遷移し、ルートの展開を投入する
    pub async fn start_job(&self, handle: &JobHandle) -> Result<(), JobError> {
        let inner = &self.inner;
        if inner.pool.is_shut_down() {
            return Err(JobError::ShuttingDown);
        }

        let job_id = handle.job_id;
        let mut job = inner.find(job_id).await?;
        let now = inner.clock.now();
        job.transition(JobState::InProgress, now)?;
        let parameter = Arc::new(job.parameter.clone());
        let depth_bound = parameter.depth.effective(inner.max_tree_depth);
        inner.store.update(job).await?;

        inner
            .lock_active()
            .insert(job_id, MultiTransferJob::new(parameter, depth_bound));
        inner.metrics.record_started();
        inner.events.emit(DomainEvent::JobStarted { job_id, at: now });
        tracing::info!(job_id = %job_id, depth_bound, "job started");

        inner.advance(job_id).await;
        Ok(())
    }

    /// create_job + start_job
    pub async fn submit_job(&self, parameter: JobParameter) -> Result<JobHandle, JobError> {
        let handle = self.create_job(parameter).await?;
        self.start_job(&handle).await?;
        Ok(handle)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, JobError> {
        self.inner.find(job_id).await
    }

    pub async fn get_job_state(&self, job_id: JobId) -> Result<JobState, JobError> {
        Ok(self.inner.find(job_id).await?.state())
    }

    /// 終端状態のジョブの結果。ERROR のジョブは部分結果を保証しない（空のこともある）
    pub async fn get_job_result(&self, job_id: JobId) -> Result<JobResult, JobError> {
        let job = self.inner.find(job_id).await?;
        if !job.is_terminal() {
            return Err(JobError::NotReady {
                job_id,
                state: job.state(),
            });
        }
        let container = match self.inner.blobs.get_blob(&result_key(job_id)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => ItemContainer::default(),
        };
        Ok(JobResult::new(job, container))
    }

    /// ERROR（Cancelled）へ遷移させる。終端状態なら何もしない
    ///
    /// 実行中の展開は中断しない。届いた結果は捨てられる。
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), JobError> {
        let inner = &self.inner;
        let mut job = inner.find(job_id).await?;
        if job.is_terminal() {
            return Ok(());
        }
        let now = inner.clock.now();
        job.fail(JobErrorKind::Cancelled, "job cancelled on request", now)?;
        inner.store.update(job).await?;
        inner.lock_active().remove(&job_id);
        inner.metrics.record_cancelled();

        inner.events.emit(DomainEvent::JobFinished {
            job_id,
            state: JobState::Error,
            at: now,
        });
        tracing::info!(job_id = %job_id, "job cancelled");
        Ok(())
    }

    /// このインスタンスが展開中のジョブ数
    pub fn active_jobs(&self) -> usize {
        self.inner.lock_active().len()
    }

    pub fn metrics(&self) -> JobMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Watchdog などと共有するカウンタ
    pub fn metrics_handle(&self) -> Arc<JobMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// ストア上で終端（または消えた）ジョブの作業状態を捨てる。捨てた数を返す
    ///
    /// 外部で ERROR にされたジョブは、展開結果が届いたときに片付く。
    /// 展開が返ってこない場合はここで拾う。
    pub async fn sweep_inactive(&self) -> usize {
        let inner = &self.inner;
        let ids: Vec<JobId> = inner.lock_active().keys().copied().collect();

        let mut swept = 0;
        for job_id in ids {
            let stale = match inner.store.find(job_id).await {
                Ok(Some(job)) => job.is_terminal(),
                Ok(None) => true,
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "cannot check active job");
                    false
                }
            };
            if stale && inner.lock_active().remove(&job_id).is_some() {
                tracing::info!(job_id = %job_id, "dropped work state of finished job");
                swept += 1;
            }
        }
        swept
    }

    /// period ごとに sweep_inactive を実行する
    pub fn start_sweeper(&self, period: Duration) -> TickerHandle {
        let orchestrator = self.clone();
        spawn_ticker("active-job-sweeper", period, move || {
            let orchestrator = orchestrator.clone();
            async move {
                let swept = orchestrator.sweep_inactive().await;
                if swept > 0 {
                    tracing::info!(swept, "active job sweep finished");
                }
            }
        })
    }

    /// ワーカープールを止める（実行中の展開は最後まで走る）
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown_and_join().await;
        tracing::info!("orchestrator stopped");
    }
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, HashMap<JobId, MultiTransferJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn find(&self, job_id: JobId) -> Result<Job, JobError> {
        self.store
            .find(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// キューにあるノードを全て投入し、終わっていれば確定処理へ進む
    async fn advance(self: &Arc<Self>, job_id: JobId) {
        let (work, finished) = {
            let mut active = self.lock_active();
            let Some(entry) = active.get_mut(&job_id) else {
                return;
            };
            let mut work = Vec::with_capacity(entry.queue.len());
            while let Some(queued) = entry.queue.pop_front() {
                entry.outstanding += 1;
                work.push(self.expansion_task(
                    job_id,
                    queued,
                    Arc::clone(&entry.parameter),
                    entry.depth_bound,
                ));
            }
            let finished = if entry.is_drained() {
                active.remove(&job_id)
            } else {
                None
            };
            (work, finished)
        };

        for item in work {
            if self.pool.submit(item).is_err() {
                self.fail_job(
                    job_id,
                    JobErrorKind::Execution,
                    "worker pool shut down before the job finished".to_string(),
                )
                .await;
                return;
            }
        }

        if let Some(entry) = finished {
            self.finalize(job_id, entry.container).await;
        }
    }

    fn expansion_task(
        self: &Arc<Self>,
        job_id: JobId,
        queued: QueuedNode,
        parameter: Arc<JobParameter>,
        depth_bound: u32,
    ) -> WorkItem {
        let inner = Arc::clone(self);
        Box::pin(async move {
            let QueuedNode { node, depth } = queued;
            let expanding = Arc::clone(&inner);
            let target = node.clone();
            let run = tokio::spawn(async move {
                expanding
                    .chain
                    .expand(job_id, target, depth, depth_bound, parameter)
                    .await
            });
            let expansion = match run.await {
                Ok(expansion) => expansion,
                Err(err) => inner.crashed_expansion(job_id, node, depth, panic_message(err)),
            };
            inner.on_expanded(job_id, expansion).await;
        })
    }

    /// panic した展開の代わりに、Tombstone だけを持つ展開結果を作る
    fn crashed_expansion(&self, job_id: JobId, node: NodeId, depth: u32, message: String) -> Expansion {
        tracing::error!(job_id = %job_id, node = %node, error = %message, "node expansion panicked");
        let detail = format!("node expansion panicked: {message}");
        let mut container = ItemContainer::new();
        container.add_tombstone(Tombstone {
            node_id: node.clone(),
            endpoint_url: String::new(),
            processing_error: ProcessingError {
                process_step: ProcessStep::NodeExpansion,
                retry_counter: 1,
                last_attempt: self.clock.now(),
                error_detail: detail.clone(),
                root_causes: vec![detail],
            },
        });
        Expansion {
            node,
            depth,
            children: Vec::new(),
            container,
        }
    }

    async fn on_expanded(self: &Arc<Self>, job_id: JobId, expansion: Expansion) {
        let state = match self.store.find(job_id).await {
            Ok(job) => job.map(|j| j.state()),
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "job store unavailable while merging");
                self.fail_job(job_id, JobErrorKind::Store, format!("job store unavailable: {err}"))
                    .await;
                return;
            }
        };

        {
            let mut active = self.lock_active();
            let Some(entry) = active.get_mut(&job_id) else {
                tracing::debug!(job_id = %job_id, node = %expansion.node, "job no longer active, dropping result");
                return;
            };
            entry.outstanding = entry.outstanding.saturating_sub(1);

            if state != Some(JobState::InProgress) {
                tracing::warn!(
                    job_id = %job_id,
                    node = %expansion.node,
                    state = ?state,
                    "discarding late expansion result"
                );
                entry.queue.clear();
                if entry.outstanding == 0 {
                    active.remove(&job_id);
                }
                return;
            }

            tracing::debug!(
                job_id = %job_id,
                node = %expansion.node,
                depth = expansion.depth,
                children = expansion.children.len(),
                "merging expansion"
            );
            entry.absorb(expansion);
        }

        self.advance(job_id).await;
    }

    async fn finalize(self: &Arc<Self>, job_id: JobId, container: ItemContainer) {
        let mut job = match self.store.find(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "job vanished before finalization");
                return;
            }
            Err(err) => {
                self.fail_job(job_id, JobErrorKind::Store, format!("job store unavailable: {err}"))
                    .await;
                return;
            }
        };
        if job.state() != JobState::InProgress {
            tracing::warn!(job_id = %job_id, state = %job.state(), "job left IN_PROGRESS before finalization, discarding result");
            return;
        }

        let now = self.clock.now();
        if let Err(err) = job.transition(JobState::TransfersFinished, now) {
            tracing::error!(job_id = %job_id, error = %err, "cannot finish transfers");
            return;
        }
        if let Err(err) = self.store.update(job.clone()).await {
            self.fail_job(job_id, JobErrorKind::Store, format!("failed to update job: {err}"))
                .await;
            return;
        }
        tracing::info!(
            job_id = %job_id,
            descriptors = container.descriptors.len(),
            tombstones = container.tombstones.len(),
            "transfers finished"
        );

        let persisted = match serde_json::to_vec(&container) {
            Ok(bytes) => self
                .blobs
                .put_blob(&result_key(job_id), bytes)
                .await
                .map_err(|e| format!("failed to persist job result: {e}")),
            Err(e) => Err(format!("failed to serialize job result: {e}")),
        };
        if let Err(detail) = persisted {
            self.fail_job(job_id, JobErrorKind::Store, detail).await;
            return;
        }

        let now = self.clock.now();
        if let Err(err) = job.complete(now) {
            tracing::error!(job_id = %job_id, error = %err, "cannot complete job");
            return;
        }
        match self.store.update(job).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "job completed");
                self.metrics.record_completed();
                self.events.emit(DomainEvent::JobFinished {
                    job_id,
                    state: JobState::Completed,
                    at: now,
                });
            }
            Err(err) => {
                self.fail_job(job_id, JobErrorKind::Store, format!("failed to update job: {err}"))
                    .await;
            }
        }
    }

    /// ジョブ単位の失敗を記録する（ストアに書いてから通知する）
    async fn fail_job(&self, job_id: JobId, kind: JobErrorKind, detail: String) {
        self.lock_active().remove(&job_id);

        let mut job = match self.store.find(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, %detail, "could not record job failure");
                return;
            }
        };
        let now = self.clock.now();
        if job.fail(kind, detail.clone(), now).is_err() {
            tracing::debug!(job_id = %job_id, state = %job.state(), "job already terminal");
            return;
        }
        match self.store.update(job).await {
            Ok(()) => {
                tracing::error!(job_id = %job_id, kind = ?kind, %detail, "job failed");
                self.metrics.record_failed();
                self.events.emit(DomainEvent::JobFinished {
                    job_id,
                    state: JobState::Error,
                    at: now,
                });
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, %detail, "could not record job failure");
            }
        }
    }
}
