//! itemtree-core
//!
//! Recursive item-tree collection: a job starts at one root node, expands it
//! through a registry / connector / validator pipeline, follows child
//! relationships up to a depth bound and merges everything into one result.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, parameter, job, state, container, errors, events）
//! - **ports**: 抽象化レイヤー（JobStore, BlobStore, DescriptorRegistry, DataTransferClient, など）
//! - **app**: アプリケーションロジック（builder, orchestrator, delegate, racer, watchdog, cleanup）
//! - **impls**: 実装（InMemoryJobStore, StaticNetwork など開発用）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
