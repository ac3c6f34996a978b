//! JobCleanup - 保持期間を過ぎた終端ジョブと結果 Blob を削除する
//!
//! COMPLETED は `completed_ttl`、ERROR は `failed_ttl` を `completed_on` から数える。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::orchestrator::result_key;
use crate::app::ticker::{TickerHandle, spawn_ticker};
use crate::config::CleanupConfig;
use crate::domain::JobState;
use crate::ports::{BlobStore, Clock, JobFilter, JobStore, StoreError};

pub struct JobCleanup {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
}

impl JobCleanup {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            clock,
            config,
        }
    }

    /// 1 回分の削除。消したジョブ数を返す
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let completed = self
            .sweep(JobState::Completed, now - self.config.completed_ttl())
            .await?;
        let failed = self
            .sweep(JobState::Error, now - self.config.failed_ttl())
            .await?;
        Ok(completed + failed)
    }

    async fn sweep(&self, state: JobState, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired = self
            .store
            .next_matching(JobFilter::state(state).completed_before(cutoff), self.config.batch_size)
            .await?;

        let mut deleted = 0;
        for job in expired {
            if self.store.delete(job.id).await?.is_none() {
                continue;
            }
            // 結果 Blob が消せなくてもジョブの削除は取り消さない
            if let Err(err) = self.blobs.delete_blob(&result_key(job.id)).await {
                tracing::warn!(job_id = %job.id, error = %err, "failed to delete job result");
            }
            tracing::debug!(job_id = %job.id, %state, "expired job deleted");
            deleted += 1;
        }
        Ok(deleted)
    }

    pub fn start(self: Arc<Self>) -> TickerHandle {
        let period = self.config.interval();
        tracing::info!(?period, "job cleanup started");
        spawn_ticker("job-cleanup", period, move || {
            let cleanup = Arc::clone(&self);
            async move {
                match cleanup.run_once().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(deleted = n, "job cleanup finished"),
                    Err(err) => tracing::error!(error = %err, "job cleanup failed"),
                }
            }
        })
    }
}
