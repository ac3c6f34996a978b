//! WorkerPool - ノード展開を実行する固定サイズのワーカー群
//!
//! # 学習ポイント
//! - 1 つの mpsc Receiver を Mutex で共有して N 本のワーカーで取り合う
//! - watch チャネルで shutdown を通知（実行中の作業は強制キャンセルしない）
//! - 作業は 1 件ずつ tokio::spawn して待つ。panic は JoinError として受け取り、ワーカーは生き残る

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

/// ワーカーが実行する作業単位
pub type WorkItem = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Worker pool handle.
/// - `request_shutdown()` で新しい作業の取り出しを止める
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    work_tx: mpsc::UnboundedSender<WorkItem>,
    shutdown_tx: watch::Sender<bool>,
    joins: StdMutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `n` workers (at least one).
    pub fn spawn(n: usize) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let joins = (0..n.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&work_rx);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, rx, shutdown_rx))
            })
            .collect();

        Self {
            work_tx,
            shutdown_tx,
            joins: StdMutex::new(joins),
        }
    }

    pub fn submit(&self, work: WorkItem) -> Result<(), PoolClosed> {
        if *self.shutdown_tx.borrow() {
            return Err(PoolClosed);
        }
        self.work_tx.send(work).map_err(|_| PoolClosed)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Request shutdown for all workers.
    /// 実行中の作業は最後まで走る。キューに残った作業は捨てられる。
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        let work = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // 変更が入ったら次のループで判定
                continue;
            }
            work = async { work_rx.lock().await.recv().await } => work,
        };

        let Some(work) = work else {
            // 送信側が全て drop された
            break;
        };
        if let Err(err) = tokio::spawn(work).await {
            tracing::error!(worker_id, error = %panic_message(err), "expansion work panicked");
        }
    }
    tracing::debug!(worker_id, "expansion worker stopped");
}

/// JoinError から panic メッセージを取り出す
pub(crate) fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
