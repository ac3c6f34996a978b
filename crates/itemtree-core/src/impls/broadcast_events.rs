//! BroadcastEventSink - tokio broadcast でイベントを配る EventSink
//!
//! テストでは `subscribe()` してジョブ完了イベントを待つ（sleep しない）。

use tokio::sync::broadcast;

use crate::domain::DomainEvent;
use crate::ports::EventSink;

pub struct BroadcastEventSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: DomainEvent) {
        // 購読者がいなければ捨てる
        let _ = self.tx.send(event);
    }
}
