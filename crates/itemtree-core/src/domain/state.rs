//! State - ジョブの状態機械
//!
//! ```text
//! UNSAVED -> INITIAL -> IN_PROGRESS -> TRANSFERS_FINISHED -> COMPLETED
//!               |            |                 |
//!               +------------+-----------------+--> ERROR
//! ```
//!
//! 終端状態は COMPLETED と ERROR のみ。

use serde::{Deserialize, Serialize};
use std::fmt;

/// JobState はジョブのライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// 初回の永続化前だけに存在する
    Unsaved,
    Initial,
    InProgress,
    TransfersFinished,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }

    /// `self -> next` が許される遷移かどうか
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Unsaved, Initial)
                | (Initial, InProgress)
                | (InProgress, TransfersFinished)
                | (TransfersFinished, Completed)
                | (Initial | InProgress | TransfersFinished, Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unsaved => "UNSAVED",
            JobState::Initial => "INITIAL",
            JobState::InProgress => "IN_PROGRESS",
            JobState::TransfersFinished => "TRANSFERS_FINISHED",
            JobState::Completed => "COMPLETED",
            JobState::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
