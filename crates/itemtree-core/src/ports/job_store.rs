//! JobStore port - ジョブレコードの正本
//!
//! Orchestrator と Watchdog（と Cleanup）が共有する唯一の可変リソース。
//! 更新は全レコード置き換えで、last-writer-wins を許容する。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobState, TransferDirection};

/// JobStore の操作エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("timed out after {0:?} waiting for the job store lock")]
    LockTimeout(Duration),

    #[error("job store backend failure: {0}")]
    Backend(String),

    #[error("job record (de)serialization failed: {0}")]
    Serialization(String),
}

/// JobFilter はバッチ読み出しの条件
///
/// 条件はストアのスキャン中に評価され、`limit` は一致したジョブだけを数える。
/// 一致しないジョブが先頭に並んでいても、後ろの一致が取りこぼされることはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFilter {
    pub state: JobState,
    pub direction: Option<TransferDirection>,
    /// `last_modified_on` がこれより前
    pub modified_before: Option<DateTime<Utc>>,
    /// `completed_on` がこれより前（未完了のジョブは一致しない）
    pub completed_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn state(state: JobState) -> Self {
        Self {
            state,
            direction: None,
            modified_before: None,
            completed_before: None,
        }
    }

    pub fn direction(mut self, direction: TransferDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn modified_before(mut self, at: DateTime<Utc>) -> Self {
        self.modified_before = Some(at);
        self
    }

    pub fn completed_before(mut self, at: DateTime<Utc>) -> Self {
        self.completed_before = Some(at);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        job.state() == self.state
            && self.direction.is_none_or(|d| job.direction == d)
            && self.modified_before.is_none_or(|at| job.last_modified_on < at)
            && self
                .completed_before
                .is_none_or(|at| job.completed_on().is_some_and(|done| done < at))
    }
}

/// JobStore はジョブをキー付きで保存する
///
/// # 契約
/// - `create`: 既存 id なら `DuplicateJob`
/// - `update`: 全置き換え。存在しなければ `NotFound`
/// - `next_matching`: 条件に一致するジョブを最大 `limit` 件返す（無期限にブロックしない）
/// - この層ではリトライしない
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<(), StoreError>;

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn update(&self, job: Job) -> Result<(), StoreError>;

    async fn next_matching(&self, filter: JobFilter, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// 指定状態のジョブを最大 `limit` 件
    async fn next_for_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.next_matching(JobFilter::state(state), limit).await
    }

    /// 削除したレコードを返す（存在しなければ None）
    async fn delete(&self, id: JobId) -> Result<Option<Job>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobErrorKind, JobParameter, NodeId};
    use chrono::TimeZone;
    use ulid::Ulid;

    fn running(at: DateTime<Utc>, direction: TransferDirection) -> Job {
        let root = NodeId::parse("urn:uuid:00000000-0000-0000-0000-000000000001").unwrap();
        let mut job = Job::new(JobId::from_ulid(Ulid::new()), JobParameter::new(root), at)
            .with_direction(direction);
        job.transition(JobState::Initial, at).unwrap();
        job.transition(JobState::InProgress, at).unwrap();
        job
    }

    #[test]
    fn filter_checks_every_given_condition() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = t0 + chrono::Duration::minutes(5);
        let job = running(t0, TransferDirection::Consumer);

        assert!(JobFilter::state(JobState::InProgress).matches(&job));
        assert!(!JobFilter::state(JobState::Initial).matches(&job));
        assert!(
            JobFilter::state(JobState::InProgress)
                .direction(TransferDirection::Consumer)
                .modified_before(later)
                .matches(&job)
        );
        assert!(
            !JobFilter::state(JobState::InProgress)
                .direction(TransferDirection::Provider)
                .matches(&job)
        );
        assert!(
            !JobFilter::state(JobState::InProgress)
                .modified_before(t0)
                .matches(&job)
        );
    }

    #[test]
    fn completed_before_skips_unfinished_jobs() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = t0 + chrono::Duration::minutes(5);
        let mut job = running(t0, TransferDirection::Consumer);
        assert!(!JobFilter::state(JobState::InProgress).completed_before(later).matches(&job));

        job.fail(JobErrorKind::Execution, "boom", t0).unwrap();
        assert!(JobFilter::state(JobState::Error).completed_before(later).matches(&job));
        assert!(!JobFilter::state(JobState::Error).completed_before(t0).matches(&job));
    }
}
