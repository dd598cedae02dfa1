//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: handler 登録と起動時検証、各サービスのワイヤリング
//! - **TaskQueue**: API 側のキュー操作（list / get / enqueue / delete / run_next）
//! - **TaskRunner**: worker 側で 1 タスクを実行
//! - **api**: JSON envelope

pub mod api;
pub mod builder;
pub mod queue;
pub mod runner;

pub use self::api::{ApiResponse, Envelope, TaskView};
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::queue::{TaskQueue, WorkerCommand, WorkerLock, parse_task_id, task_run_lock};
pub use self::runner::TaskRunner;
