//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::output::TaskOutput;
use super::task::Task;
use crate::domain::{Metadata, TaskError};

/// Handler は Task を実行する
///
/// # 使用例
/// ```ignore
/// struct RemovePackageHandler;
///
/// #[async_trait]
/// impl Handler<RemovePackage> for RemovePackageHandler {
///     async fn handle(&self, task: RemovePackage, out: &mut TaskOutput) -> Result<(), TaskError> {
///         out.line(&format!("removing {}", task.package))
///     }
/// }
/// ```
///
/// Returning `Err` marks the task ERROR; the error's message is appended to
/// the output.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, out: &mut TaskOutput) -> Result<(), TaskError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `TypedHandler<T, H>` を経由して `Arc<dyn DynHandler>` として registry に格納。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, metadata: Metadata, out: &mut TaskOutput) -> Result<(), TaskError>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, metadata: Metadata, out: &mut TaskOutput) -> Result<(), TaskError> {
        let task: T = serde_json::from_value(serde_json::Value::Object(metadata))
            .map_err(|e| TaskError::InvalidPayload(format!("{}: {e}", T::TYPE)))?;
        self.handler.handle(task, out).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}
