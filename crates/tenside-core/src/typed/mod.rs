//! Typed - 型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! Handlers write their progress through a [`TaskOutput`].

pub mod handler;
pub mod output;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::output::TaskOutput;
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
