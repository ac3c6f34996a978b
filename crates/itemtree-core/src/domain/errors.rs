//! Errors - エラー型と分類
//!
//! # 分類
//! - **ValidationError**: ジョブパラメータの不正（Job は作られない）
//! - **RemoteError**: 外部コラボレータ呼び出しの失敗（リトライ可否を持つ）
//! - **AggregateError**: 全ての候補が失敗したときの集約エラー（Racer が返す）
//! - **RaceFailure**: Racer の 1 候補の失敗（通常のエラーか panic）
//! - **TransitionError**: 状態遷移の違反
//!
//! ノード単位のエラーは Tombstone としてデータに変換され、ジョブを失敗させない。

use std::fmt;

use super::state::JobState;

/// ValidationError はジョブ作成時の入力検証エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed id: {0}")]
    MalformedId(String),

    #[error("malformed node id '{0}': expected urn:uuid:<uuid>")]
    MalformedNodeId(String),

    #[error("depth must be at least 1")]
    ZeroDepth,

    #[error("depth {requested} exceeds the allowed maximum of {max}")]
    DepthExceeded { requested: u32, max: u32 },

    #[error("aspect type must not be blank")]
    BlankAspect,
}

/// TransitionError は状態機械で許されない遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal job state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Retryable はリトライポリシーが再試行してよいエラーを表す
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// RemoteError は外部コラボレータ（レジストリ、データ転送、名前解決）の失敗分類
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// 対象が存在しない（リトライしても変わらない）
    #[error("not found: {0}")]
    NotFound(String),

    /// 一時的な失敗（タイムアウト、接続断など）
    #[error("retryable remote failure: {0}")]
    Retryable(String),

    /// 恒久的な失敗（契約拒否、不正な応答など）
    #[error("fatal remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Retryable(_))
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        RemoteError::is_retryable(self)
    }
}

/// AggregateError は全ての操作が失敗したときの集約エラー
///
/// 最初の原因が primary、残りは suppressed として元の順序のまま保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError<E> {
    primary: E,
    suppressed: Vec<E>,
}

impl<E> AggregateError<E> {
    /// 原因のリストから作成（空なら None）
    pub fn from_causes(causes: Vec<E>) -> Option<Self> {
        let mut iter = causes.into_iter();
        let primary = iter.next()?;
        Some(Self {
            primary,
            suppressed: iter.collect(),
        })
    }

    pub fn primary(&self) -> &E {
        &self.primary
    }

    pub fn suppressed(&self) -> &[E] {
        &self.suppressed
    }

    /// primary を先頭に、全ての原因を元の順序で返す
    pub fn causes(&self) -> impl Iterator<Item = &E> {
        std::iter::once(&self.primary).chain(self.suppressed.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn into_causes(self) -> Vec<E> {
        let mut causes = Vec::with_capacity(1 + self.suppressed.len());
        causes.push(self.primary);
        causes.extend(self.suppressed);
        causes
    }
}

impl<E: fmt::Display> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} operations failed: {}", self.len(), self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for AggregateError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}

impl<E: Retryable> Retryable for AggregateError<E> {
    fn is_retryable(&self) -> bool {
        self.causes().any(Retryable::is_retryable)
    }
}

/// RaceFailure は競争させた 1 操作の失敗理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceFailure<E> {
    /// 操作が Err を返した
    Failed(E),
    /// 操作が panic した（メッセージのみ残る）
    Panicked(String),
}

impl<E> RaceFailure<E> {
    pub fn failed(&self) -> Option<&E> {
        match self {
            RaceFailure::Failed(err) => Some(err),
            RaceFailure::Panicked(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RaceFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceFailure::Failed(err) => err.fmt(f),
            RaceFailure::Panicked(message) => write!(f, "operation panicked: {message}"),
        }
    }
}

impl<E> std::error::Error for RaceFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RaceFailure::Failed(err) => Some(err),
            RaceFailure::Panicked(_) => None,
        }
    }
}

impl<E: Retryable> Retryable for RaceFailure<E> {
    fn is_retryable(&self) -> bool {
        // panic は再試行しない
        self.failed().is_some_and(Retryable::is_retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RemoteError::NotFound("x".into()), false)]
    #[case(RemoteError::Retryable("x".into()), true)]
    #[case(RemoteError::Fatal("x".into()), false)]
    fn remote_error_retryability(#[case] err: RemoteError, #[case] expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn aggregate_keeps_original_order() {
        let agg = AggregateError::from_causes(vec!["a", "b", "c"]).unwrap();
        assert_eq!(*agg.primary(), "a");
        assert_eq!(agg.suppressed(), &["b", "c"]);
        assert_eq!(agg.causes().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(agg.len(), 3);
    }

    #[test]
    fn aggregate_from_no_causes_is_none() {
        assert!(AggregateError::<RemoteError>::from_causes(vec![]).is_none());
    }

    #[test]
    fn aggregate_is_retryable_when_any_cause_is() {
        let agg = AggregateError::from_causes(vec![
            RemoteError::NotFound("a".into()),
            RemoteError::Retryable("b".into()),
        ])
        .unwrap();
        assert!(agg.is_retryable());

        let agg = AggregateError::from_causes(vec![
            RemoteError::NotFound("a".into()),
            RemoteError::Fatal("b".into()),
        ])
        .unwrap();
        assert!(!agg.is_retryable());
    }

    #[test]
    fn aggregate_display_mentions_primary() {
        let agg = AggregateError::from_causes(vec![
            RemoteError::NotFound("first".into()),
            RemoteError::Fatal("second".into()),
        ])
        .unwrap();
        assert_eq!(
            agg.to_string(),
            "all 2 operations failed: not found: first (+1 suppressed)"
        );
    }

    #[test]
    fn race_failure_display_and_retryability() {
        let failed = RaceFailure::Failed(RemoteError::Retryable("slow".into()));
        let panicked = RaceFailure::<RemoteError>::Panicked("index out of bounds".into());

        assert_eq!(failed.to_string(), RemoteError::Retryable("slow".into()).to_string());
        assert_eq!(panicked.to_string(), "operation panicked: index out of bounds");
        assert!(failed.is_retryable());
        assert!(!panicked.is_retryable());
        assert!(panicked.failed().is_none());
    }
}
