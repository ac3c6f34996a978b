//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryJobStore / PersistentJobStore**: 読み書きロック付きの JobStore
//! - **InMemoryBlobStore**: 開発用の Blob ストレージ
//! - **BroadcastEventSink**: 購読可能な EventSink
//! - **StaticNetwork**: 固定データのレジストリ / コネクタ / 名前解決
//! - **AcceptAllValidator / RequiredFieldsValidator**: スキーマ検証
//!
//! 本番用の実装（HTTP レジストリ、EDC コネクタ、S3 など）は別クレートに配置します。

pub mod broadcast_events;
pub mod inmem_blob_store;
pub mod job_store;
pub mod static_network;
pub mod validators;

// 主要な型を再エクスポート
pub use self::broadcast_events::BroadcastEventSink;
pub use self::inmem_blob_store::InMemoryBlobStore;
pub use self::job_store::{
    BlobJobs, DEFAULT_LOCK_TIMEOUT, InMemoryJobStore, JobBackend, LockingJobStore, MemoryJobs,
    PersistentJobStore,
};
pub use self::static_network::StaticNetwork;
pub use self::validators::{AcceptAllValidator, RequiredFieldsValidator};
