//! Domain model (ids, status machine, task records, errors).

pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, TaskError};
pub use self::ids::{ParseIdError, TaskId};
pub use self::state::TaskStatus;
pub use self::task::{Metadata, TaskRecord, TaskType};
