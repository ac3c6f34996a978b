//! JobMetrics - ジョブ数のカウンタ
//!
//! Orchestrator と Watchdog が同じインスタンスを共有して更新する。
//! 読み出しは `snapshot()` で、シリアライズ可能な値のコピーを返す。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// ある時点のカウンタの値
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetricsSnapshot {
    pub created: u64,
    pub started: u64,
    pub completed: u64,
    /// キャンセル・タイムアウト以外の理由で ERROR になった数
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    /// started から終端に達した数を引いたもの
    pub running: u64,
}

#[derive(Debug, Default)]
pub struct JobMetrics {
    created: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let started = load(&self.started);
        let completed = load(&self.completed);
        let failed = load(&self.failed);
        let cancelled = load(&self.cancelled);
        let timed_out = load(&self.timed_out);
        JobMetricsSnapshot {
            created: load(&self.created),
            started,
            completed,
            failed,
            cancelled,
            timed_out,
            // 他インスタンスのジョブを Watchdog が回収した分は 0 で止める
            running: started.saturating_sub(completed + failed + cancelled + timed_out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_running_jobs() {
        let metrics = JobMetrics::new();
        for _ in 0..4 {
            metrics.record_created();
            metrics.record_started();
        }
        metrics.record_created();
        metrics.record_completed();
        metrics.record_failed();
        metrics.record_cancelled();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.created, 5);
        assert_eq!(snapshot.started, 4);
        assert_eq!(snapshot.running, 1);
        assert_eq!(snapshot.timed_out, 0);
    }

    #[test]
    fn running_never_underflows() {
        let metrics = JobMetrics::new();
        metrics.record_timed_out();
        assert_eq!(metrics.snapshot().running, 0);
    }

    #[test]
    fn snapshot_serializes_as_flat_counts() {
        let metrics = JobMetrics::new();
        metrics.record_created();
        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(value["created"], 1);
        assert_eq!(value["timed_out"], 0);
    }
}
