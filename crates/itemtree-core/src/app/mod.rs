//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: JobOrchestrator の構築とワイヤリング
//! - **JobOrchestrator**: ジョブの状態機械と展開キュー
//! - **DelegateChain**: 1 ノードを固定順のステージで展開
//! - **race_first_success**: 並行実行して最初の成功を採用
//! - **Watchdog**: 止まったジョブを ERROR へ
//! - **JobCleanup**: 期限切れジョブの削除
//! - **JobMetrics**: 作成・完了・失敗などのジョブ数カウンタ

pub mod builder;
pub mod cleanup;
pub mod delegate;
pub mod metrics;
pub mod orchestrator;
pub mod racer;
pub mod retry;
pub mod ticker;
pub mod watchdog;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::cleanup::JobCleanup;
pub use self::delegate::{
    Collaborators, DelegateChain, Expansion, ExpansionStage, NodeContext, RemoteCalls,
};
pub use self::metrics::{JobMetrics, JobMetricsSnapshot};
pub use self::orchestrator::{JobError, JobOrchestrator, RESULT_PREFIX, result_key};
pub use self::racer::race_first_success;
pub use self::retry::{Exhausted, RetryOutcome, RetryPolicy};
pub use self::ticker::{TickerHandle, spawn_ticker};
pub use self::watchdog::Watchdog;
pub use self::worker_pool::{PoolClosed, WorkItem, WorkerPool};
