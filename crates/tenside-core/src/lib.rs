//! tenside-core
//!
//! Durable single-host task queue with detached execution.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, ProcessSpawner, Clock, IdGenerator）
//! - **impls**: 実装（ファイルベースの store / lock、OS プロセス起動）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry, TaskOutput）
//! - **tasks**: 組み込みタスク（upgrade, require-package, remove-package）
//! - **app**: アプリケーションロジック（builder, queue, runner, api）
//! - **config**: `tenside.toml`

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod tasks;
pub mod typed;

pub use crate::config::Settings;
pub use crate::domain::{TaskError, TaskId, TaskStatus};
