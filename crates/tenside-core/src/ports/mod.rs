//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部資源（ファイルシステム、OS プロセス、時刻）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod spawner;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::spawner::{ProcessHandle, ProcessSpawner, SpawnRequest};
pub use self::task_store::TaskStore;
