//! Ticker - 固定間隔で非同期処理を繰り返すバックグラウンドタスク
//!
//! Watchdog と JobCleanup が使う。停止要求はスキャンの合間にだけ見るので、
//! 実行中のスキャンは中断されない。

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 動作中の ticker へのハンドル
pub struct TickerHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TickerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 以降の tick を止める（実行中の処理は最後まで走る）
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn stop_and_join(self) {
        self.stop();
        let _ = self.join.await;
    }
}

/// `period` ごとに `tick` を実行する。最初の実行は 1 周期後。
pub fn spawn_ticker<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> TickerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let period = period.max(Duration::from_millis(1));

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(ticker = name, period_ms = period.as_millis() as u64, "ticker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => tick().await,
            }
        }
        tracing::info!(ticker = name, "ticker stopped");
    });

    TickerHandle {
        name,
        shutdown_tx,
        join,
    }
}
