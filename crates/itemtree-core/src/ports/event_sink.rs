//! EventSink port - イベント記録の抽象化
//!
//! - NoopEventSink: 何もしない（デフォルト）
//! - BroadcastEventSink（impls）: tokio broadcast で購読者に配る

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを受け取る
///
/// 送信失敗でジョブを止めないため、戻り値は持たない。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// NoopEventSink は全てのイベントを捨てる
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: DomainEvent) {}
}
