//! Watchdog - IN_PROGRESS のまま止まったジョブを回収する
//!
//! # アルゴリズム
//! 1. IN_PROGRESS・Consumer 方向・`last_modified_on` が state_timeout より古いジョブを
//!    ストアのスキャン中に絞り込み、最大 batch_size 件取得
//! 2. ERROR（Timeout）へ遷移して保存
//!
//! 絞り込みをストア側で行うので、Provider や若いジョブが先頭に並んでも
//! 古い Consumer ジョブが取り残されることはない。
//!
//! # 既知の競合
//! 保存前にジョブを読み直さない。同じ瞬間に Orchestrator が完了させたジョブを
//! ERROR で上書きすることがある（後勝ち）。

use std::sync::Arc;

use crate::app::metrics::JobMetrics;
use crate::app::ticker::{TickerHandle, spawn_ticker};
use crate::config::WatchdogConfig;
use crate::domain::{DomainEvent, JobErrorKind, JobState, TransferDirection};
use crate::ports::{Clock, EventSink, JobFilter, JobStore, NoopEventSink, StoreError};

pub struct Watchdog {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    metrics: Arc<JobMetrics>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: WatchdogConfig) -> Self {
        Self {
            store,
            clock,
            events: Arc::new(NoopEventSink),
            metrics: Arc::default(),
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Orchestrator と同じカウンタに timed_out を記録する
    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// 1 回分のスキャン。ERROR にしたジョブ数を返す
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let deadline = now - self.config.state_timeout();
        let stale = JobFilter::state(JobState::InProgress)
            .direction(TransferDirection::Consumer)
            .modified_before(deadline);
        let candidates = self.store.next_matching(stale, self.config.batch_size).await?;

        let mut reclaimed = 0;
        for mut job in candidates {
            let detail = format!(
                "Timed out waiting for job to complete after > {}s",
                self.config.state_timeout_secs
            );
            if job.fail(JobErrorKind::Timeout, detail, now).is_err() {
                continue;
            }
            let job_id = job.id;
            match self.store.update(job).await {
                Ok(()) => {
                    tracing::warn!(job_id = %job_id, timeout_secs = self.config.state_timeout_secs, "job timed out");
                    self.metrics.record_timed_out();
                    self.events.emit(DomainEvent::JobFinished {
                        job_id,
                        state: JobState::Error,
                        at: now,
                    });
                    reclaimed += 1;
                }
                Err(err) => {
                    tracing::error!(job_id = %job_id, error = %err, "failed to record job timeout");
                }
            }
        }
        Ok(reclaimed)
    }

    /// poll_interval ごとに run_once を実行する
    pub fn start(self: Arc<Self>) -> TickerHandle {
        let period = self.config.poll_interval();
        tracing::info!(?period, "watchdog started");
        spawn_ticker("watchdog", period, move || {
            let watchdog = Arc::clone(&self);
            async move {
                match watchdog.run_once().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(reclaimed = n, "watchdog scan finished"),
                    Err(err) => tracing::error!(error = %err, "watchdog scan failed"),
                }
            }
        })
    }
}
