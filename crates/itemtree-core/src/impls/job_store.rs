//! LockingJobStore - 読み書きロック付きの JobStore
//!
//! # 学習ポイント
//! - tokio::sync::RwLock + tokio::time::timeout による「待ち時間に上限のある」ロック
//! - バックエンド（メモリ / Blob）を差し替えても同じロック規律を共有する
//!
//! 書き込みは 1 件ずつ排他、バッチ読み出しは並行に行える。
//! ロックが取れなければ deadlock せずに `StoreError::LockTimeout` を返す。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{Job, JobId};
use crate::ports::{BlobError, BlobStore, JobFilter, JobStore, StoreError};

/// ロック内で使われる生のストレージ
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn put(&mut self, job: Job) -> Result<(), StoreError>;

    async fn remove(&mut self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// 一致したものだけを数えて最大 limit 件
    async fn scan(&self, filter: &JobFilter, limit: usize) -> Result<Vec<Job>, StoreError>;
}

/// LockingJobStore は任意の JobBackend を RwLock で包む
pub struct LockingJobStore<B> {
    inner: RwLock<B>,
    lock_timeout: Duration,
}

/// 開発・テスト用
pub type InMemoryJobStore = LockingJobStore<MemoryJobs>;

/// Blob ストレージに JSON で保存する
pub type PersistentJobStore = LockingJobStore<BlobJobs>;

/// 30 秒
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

impl<B: JobBackend> LockingJobStore<B> {
    pub fn new(backend: B, lock_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(backend),
            lock_timeout,
        }
    }

    async fn read(&self) -> Result<RwLockReadGuard<'_, B>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.inner.read())
            .await
            .map_err(|_| StoreError::LockTimeout(self.lock_timeout))
    }

    async fn write(&self) -> Result<RwLockWriteGuard<'_, B>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.inner.write())
            .await
            .map_err(|_| StoreError::LockTimeout(self.lock_timeout))
    }
}

impl InMemoryJobStore {
    pub fn in_memory(lock_timeout: Duration) -> Self {
        Self::new(MemoryJobs::default(), lock_timeout)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::in_memory(DEFAULT_LOCK_TIMEOUT)
    }
}

impl PersistentJobStore {
    pub fn persistent(blobs: Arc<dyn BlobStore>, lock_timeout: Duration) -> Self {
        Self::new(BlobJobs::new(blobs), lock_timeout)
    }
}

#[async_trait]
impl<B: JobBackend> JobStore for LockingJobStore<B> {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut guard = self.write().await?;
        if guard.get(job.id).await?.is_some() {
            return Err(StoreError::DuplicateJob(job.id));
        }
        guard.put(job).await
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.read().await?.get(id).await
    }

    async fn update(&self, job: Job) -> Result<(), StoreError> {
        let mut guard = self.write().await?;
        if guard.get(job.id).await?.is_none() {
            return Err(StoreError::NotFound(job.id));
        }
        guard.put(job).await
    }

    async fn next_matching(&self, filter: JobFilter, limit: usize) -> Result<Vec<Job>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.read().await?.scan(&filter, limit).await
    }

    async fn delete(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.write().await?.remove(id).await
    }
}

/// MemoryJobs はジョブを BTreeMap に保持する（ULID 順 = 作成順）
#[derive(Debug, Default)]
pub struct MemoryJobs {
    jobs: BTreeMap<JobId, Job>,
}

#[async_trait]
impl JobBackend for MemoryJobs {
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(&id).cloned())
    }

    async fn put(&mut self, job: Job) -> Result<(), StoreError> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn remove(&mut self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.remove(&id))
    }

    async fn scan(&self, filter: &JobFilter, limit: usize) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .take(limit)
            .cloned()
            .collect())
    }
}

const JOB_PREFIX: &str = "jobs/";

/// BlobJobs は各ジョブを `jobs/<job-id>.json` に保存する
pub struct BlobJobs {
    blobs: Arc<dyn BlobStore>,
}

impl BlobJobs {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn key(id: JobId) -> String {
        format!("{JOB_PREFIX}{id}.json")
    }

    fn decode(bytes: &[u8]) -> Result<Job, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

fn backend(err: BlobError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl JobBackend for BlobJobs {
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        match self.blobs.get_blob(&Self::key(id)).await.map_err(backend)? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&mut self, job: Job) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(&job).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.blobs
            .put_blob(&Self::key(job.id), bytes)
            .await
            .map_err(backend)
    }

    async fn remove(&mut self, id: JobId) -> Result<Option<Job>, StoreError> {
        let existing = self.get(id).await?;
        if existing.is_some() {
            self.blobs
                .delete_blob(&Self::key(id))
                .await
                .map_err(backend)?;
        }
        Ok(existing)
    }

    async fn scan(&self, filter: &JobFilter, limit: usize) -> Result<Vec<Job>, StoreError> {
        let keys = self.blobs.list_keys(JOB_PREFIX).await.map_err(backend)?;
        let mut found = Vec::new();
        for key in keys {
            // 読み出しの間に削除されたものは飛ばす
            let Some(bytes) = self.blobs.get_blob(&key).await.map_err(backend)? else {
                continue;
            };
            let job = Self::decode(&bytes)?;
            if filter.matches(&job) {
                found.push(job);
                if found.len() == limit {
                    break;
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobParameter, JobState, NodeId, TransferDirection};
    use crate::impls::InMemoryBlobStore;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use ulid::Ulid;

    fn job(state: JobState) -> Job {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let root = NodeId::parse("urn:uuid:00000000-0000-0000-0000-000000000001").unwrap();
        let mut job = Job::new(JobId::from_ulid(Ulid::new()), JobParameter::new(root), now);
        let path = [
            JobState::Initial,
            JobState::InProgress,
            JobState::TransfersFinished,
            JobState::Completed,
        ];
        for next in path {
            if job.state() == state {
                break;
            }
            job.transition(next, now).unwrap();
        }
        job
    }

    fn in_memory() -> InMemoryJobStore {
        InMemoryJobStore::in_memory(Duration::from_millis(50))
    }

    fn persistent() -> PersistentJobStore {
        PersistentJobStore::persistent(Arc::new(InMemoryBlobStore::new()), Duration::from_millis(50))
    }

    async fn exercise_contract(store: &dyn JobStore) {
        let a = job(JobState::Initial);
        store.create(a.clone()).await.unwrap();
        assert_eq!(store.find(a.id).await.unwrap(), Some(a.clone()));

        assert_eq!(
            store.create(a.clone()).await,
            Err(StoreError::DuplicateJob(a.id))
        );

        let mut moved = a.clone();
        moved.transition(JobState::InProgress, Utc::now()).unwrap();
        store.update(moved.clone()).await.unwrap();
        assert_eq!(
            store.find(a.id).await.unwrap().map(|j| j.state()),
            Some(JobState::InProgress)
        );

        let ghost = job(JobState::Initial);
        assert_eq!(store.update(ghost.clone()).await, Err(StoreError::NotFound(ghost.id)));

        assert_eq!(store.delete(a.id).await.unwrap(), Some(moved));
        assert_eq!(store.find(a.id).await.unwrap(), None);
        assert_eq!(store.delete(a.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_store_honours_contract() {
        exercise_contract(&in_memory()).await;
    }

    #[tokio::test]
    async fn persistent_store_honours_contract() {
        exercise_contract(&persistent()).await;
    }

    #[rstest]
    #[case(10, 3)]
    #[case(2, 2)]
    #[case(0, 0)]
    #[tokio::test]
    async fn next_for_state_filters_and_limits(#[case] limit: usize, #[case] expected: usize) {
        let store = in_memory();
        for _ in 0..3 {
            store.create(job(JobState::InProgress)).await.unwrap();
        }
        store.create(job(JobState::Completed)).await.unwrap();

        let batch = store.next_for_state(JobState::InProgress, limit).await.unwrap();
        assert_eq!(batch.len(), expected);
        assert!(batch.iter().all(|j| j.state() == JobState::InProgress));
    }

    #[tokio::test]
    async fn persistent_store_scans_by_state() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = PersistentJobStore::persistent(blobs.clone(), Duration::from_secs(1));
        let running = job(JobState::InProgress);
        store.create(running.clone()).await.unwrap();
        store.create(job(JobState::Completed)).await.unwrap();

        let batch = store.next_for_state(JobState::InProgress, 5).await.unwrap();
        assert_eq!(batch, vec![running.clone()]);

        let key = format!("jobs/{}.json", running.id);
        assert!(blobs.get_blob(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn limit_counts_only_matching_jobs() {
        for store in [&in_memory() as &dyn JobStore, &persistent() as &dyn JobStore] {
            // 一致しないジョブが ULID 順の先頭に並ぶ
            for _ in 0..3 {
                let provider = job(JobState::InProgress).with_direction(TransferDirection::Provider);
                store.create(provider).await.unwrap();
            }
            let consumer = job(JobState::InProgress).with_direction(TransferDirection::Consumer);
            store.create(consumer.clone()).await.unwrap();

            let filter = JobFilter::state(JobState::InProgress).direction(TransferDirection::Consumer);
            let batch = store.next_matching(filter, 1).await.unwrap();
            assert_eq!(batch, vec![consumer]);
        }
    }

    #[tokio::test]
    async fn persistent_store_reports_corrupt_records() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = PersistentJobStore::persistent(blobs.clone(), Duration::from_secs(1));
        blobs
            .put_blob("jobs/broken.json", b"{not json".to_vec())
            .await
            .unwrap();

        let err = store.next_for_state(JobState::Initial, 5).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn held_write_lock_times_out_instead_of_deadlocking() {
        let store = in_memory();
        let a = job(JobState::Initial);
        store.create(a.clone()).await.unwrap();

        let _writer = store.inner.write().await;
        let err = store.find(a.id).await.unwrap_err();
        assert_eq!(err, StoreError::LockTimeout(Duration::from_millis(50)));
        let err = store.update(a).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn concurrent_readers_do_not_block_each_other() {
        let store = in_memory();
        store.create(job(JobState::InProgress)).await.unwrap();

        let _reader = store.inner.read().await;
        let batch = store.next_for_state(JobState::InProgress, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
