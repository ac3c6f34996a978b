//! Events - ドメインイベント
//!
//! EventSink へ送られるジョブのライフサイクルイベント。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::state::JobState;

/// DomainEvent はドメインで発生したイベント
///
/// - JobStarted: IN_PROGRESS に入った
/// - JobFinished: 終端状態（COMPLETED / ERROR）に到達した
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    JobStarted {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    JobFinished {
        job_id: JobId,
        state: JobState,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            DomainEvent::JobStarted { job_id, .. } | DomainEvent::JobFinished { job_id, .. } => {
                *job_id
            }
        }
    }
}
