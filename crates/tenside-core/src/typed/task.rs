//! Task trait - 型付き Task の定義
//!
//! A task type name (the `type` field of an enqueue request) is bound to a
//! Rust payload type at compile time.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct RemovePackage {
///     package: String,
/// }
///
/// impl Task for RemovePackage {
///     const TYPE: &'static str = "remove-package";
/// }
/// ```
///
/// The payload is decoded from the record's metadata, which still carries the
/// `type` key; unknown fields are ignored.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
