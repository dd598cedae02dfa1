pub mod file_lock;
pub mod fs_store;
pub mod os_spawner;

pub use self::file_lock::{FileLock, LockGuard};
pub use self::fs_store::FileTaskStore;
pub use self::os_spawner::{OsProcessSpawner, SpawnStrategy};
