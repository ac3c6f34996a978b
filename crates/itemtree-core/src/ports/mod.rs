//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部コラボレータ（レジストリ、コネクタ、スキーマ検証、
//! パートナー名キャッシュ、Blob ストレージ）へのインターフェースを提供し、
//! Orchestrator と各展開ステージにコンストラクタで注入されます。

pub mod blob_store;
pub mod clock;
pub mod enrichment;
pub mod event_sink;
pub mod id_generator;
pub mod job_store;
pub mod registry;
pub mod transfer;
pub mod validator;

// 主要な trait を再エクスポート
pub use self::blob_store::{BlobError, BlobStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::enrichment::PartyNameLookup;
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobFilter, JobStore, StoreError};
pub use self::registry::DescriptorRegistry;
pub use self::transfer::DataTransferClient;
pub use self::validator::{SchemaValidator, ValidationOutcome};
