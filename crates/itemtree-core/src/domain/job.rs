//! Job record and status management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::container::ItemContainer;
use super::errors::TransitionError;
use super::ids::JobId;
use super::parameter::JobParameter;
use super::state::JobState;

/// Which side initiated the transfers of a job.
///
/// Jobs created by this system always pull data and are `Consumer` jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferDirection {
    #[default]
    Consumer,
    Provider,
}

/// Why a job ended in `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorKind {
    Cancelled,
    Timeout,
    Execution,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorDetails {
    pub kind: JobErrorKind,
    pub detail: String,
    pub occurred_on: DateTime<Utc>,
}

/// Job record: header of one crawl.
///
/// Design:
/// - State transitions via methods only (`transition`, `complete`, `fail`)
/// - `completed_on` is set exactly once, when a terminal state is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub parameter: JobParameter,
    pub direction: TransferDirection,
    state: JobState,
    pub created_on: DateTime<Utc>,
    pub started_on: Option<DateTime<Utc>>,
    pub last_modified_on: DateTime<Utc>,
    completed_on: Option<DateTime<Utc>>,
    error: Option<JobErrorDetails>,
}

impl Job {
    /// A fresh job in `UNSAVED`; the first persist moves it to `INITIAL`.
    pub fn new(id: JobId, parameter: JobParameter, now: DateTime<Utc>) -> Self {
        Self {
            id,
            parameter,
            direction: TransferDirection::Consumer,
            state: JobState::Unsaved,
            created_on: now,
            started_on: None,
            last_modified_on: now,
            completed_on: None,
            error: None,
        }
    }

    pub fn with_direction(mut self, direction: TransferDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn completed_on(&self) -> Option<DateTime<Utc>> {
        self.completed_on
    }

    pub fn error(&self) -> Option<&JobErrorDetails> {
        self.error.as_ref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.detail.as_str())
    }

    pub fn owner(&self) -> &str {
        &self.parameter.owner
    }

    pub fn action(&self) -> &str {
        &self.parameter.action
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, stamping the timestamps that belong to it.
    pub fn transition(&mut self, next: JobState, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.last_modified_on = now;
        if next == JobState::InProgress {
            self.started_on = Some(now);
        }
        if next.is_terminal() {
            self.completed_on = Some(now);
        }
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobState::Completed, now)
    }

    /// Force the job into `ERROR`, recording why.
    pub fn fail(
        &mut self,
        kind: JobErrorKind,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::Error, now)?;
        self.error = Some(JobErrorDetails {
            kind,
            detail: detail.into(),
            occurred_on: now,
        });
        Ok(())
    }
}

/// Returned to callers when a job is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub created_on: DateTime<Utc>,
}

/// Counts over a merged container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub descriptors: usize,
    pub relationships: usize,
    pub submodels: usize,
    pub tombstones: usize,
}

impl From<&ItemContainer> for JobSummary {
    fn from(container: &ItemContainer) -> Self {
        Self {
            descriptors: container.descriptors.len(),
            relationships: container.relationships.len(),
            submodels: container.submodels.len(),
            tombstones: container.tombstones.len(),
        }
    }
}

/// Job header plus the merged result.
///
/// For a job in `ERROR` the container holds whatever was persisted, which may be nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,
    pub summary: JobSummary,
    pub container: ItemContainer,
}

impl JobResult {
    pub fn new(job: Job, container: ItemContainer) -> Self {
        Self {
            summary: JobSummary::from(&container),
            job,
            container,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::NodeId;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn job() -> (Job, DateTime<Utc>) {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let root = NodeId::parse("urn:uuid:00000000-0000-0000-0000-000000000001").unwrap();
        let job = Job::new(
            JobId::from_ulid(Ulid::new()),
            JobParameter::new(root).with_owner("alice"),
            t0,
        );
        (job, t0)
    }

    #[test]
    fn new_job_is_unsaved_consumer() {
        let (job, t0) = job();
        assert_eq!(job.state(), JobState::Unsaved);
        assert_eq!(job.direction, TransferDirection::Consumer);
        assert_eq!(job.created_on, t0);
        assert_eq!(job.owner(), "alice");
        assert!(job.completed_on().is_none());
    }

    #[test]
    fn happy_path_stamps_timestamps() {
        let (mut job, t0) = job();
        let t1 = t0 + Duration::seconds(1);
        let t2 = t0 + Duration::seconds(5);

        job.transition(JobState::Initial, t0).unwrap();
        job.transition(JobState::InProgress, t1).unwrap();
        assert_eq!(job.started_on, Some(t1));
        job.transition(JobState::TransfersFinished, t2).unwrap();
        assert!(job.completed_on().is_none());
        job.complete(t2).unwrap();

        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.completed_on(), Some(t2));
        assert_eq!(job.last_modified_on, t2);
    }

    #[test]
    fn fail_records_error_details() {
        let (mut job, t0) = job();
        job.transition(JobState::Initial, t0).unwrap();
        job.transition(JobState::InProgress, t0).unwrap();
        job.fail(JobErrorKind::Cancelled, "cancelled by user", t0).unwrap();

        assert_eq!(job.state(), JobState::Error);
        assert_eq!(job.error_detail(), Some("cancelled by user"));
        assert_eq!(job.error().map(|e| e.kind), Some(JobErrorKind::Cancelled));
        assert_eq!(job.completed_on(), Some(t0));
    }

    #[test]
    fn terminal_state_cannot_be_left() {
        let (mut job, t0) = job();
        job.transition(JobState::Initial, t0).unwrap();
        job.fail(JobErrorKind::Execution, "boom", t0).unwrap();

        let later = t0 + Duration::seconds(10);
        let err = job.fail(JobErrorKind::Timeout, "again", later).unwrap_err();
        assert_eq!(err.from, JobState::Error);
        // completed_on is only ever set once
        assert_eq!(job.completed_on(), Some(t0));
        assert_eq!(job.error_detail(), Some("boom"));
    }

    #[test]
    fn skipping_states_is_rejected() {
        let (mut job, t0) = job();
        let err = job.transition(JobState::InProgress, t0).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: JobState::Unsaved,
                to: JobState::InProgress
            }
        );
        assert_eq!(job.state(), JobState::Unsaved);
    }

    #[test]
    fn job_serializes_roundtrip() {
        let (mut job, t0) = job();
        job.transition(JobState::Initial, t0).unwrap();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"INITIAL\""));
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
