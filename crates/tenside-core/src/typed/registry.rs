//! TypedRegistry - Handler の登録と管理
//!
//! - BTreeMap での型消去された trait object の管理（列挙順が安定）
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::BTreeMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;

/// TypedRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<Upgrade, _>(UpgradeHandler::new(pm))?;
///
/// let handler = registry.get("upgrade");
/// ```
#[derive(Default)]
pub struct TypedRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(T::TYPE) {
            return Err(RegistryError::AlreadyRegistered(T::TYPE.to_string()));
        }
        self.handlers
            .insert(T::TYPE, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().map(|t| t.to_string()).collect()
    }
}

impl std::fmt::Debug for TypedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskError;
    use crate::typed::TaskOutput;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Alpha {}

    impl Task for Alpha {
        const TYPE: &'static str = "alpha";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Beta {
        value: i32,
    }

    impl Task for Beta {
        const TYPE: &'static str = "beta";
    }

    struct Noop;

    #[async_trait]
    impl Handler<Alpha> for Noop {
        async fn handle(&self, _task: Alpha, _out: &mut TaskOutput) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Beta> for Noop {
        async fn handle(&self, _task: Beta, _out: &mut TaskOutput) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = TypedRegistry::new();
        registry.register::<Alpha, _>(Noop).unwrap();

        let handler = registry.get("alpha").unwrap();
        assert_eq!(handler.task_type(), "alpha");
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TypedRegistry::new();
        registry.register::<Alpha, _>(Noop).unwrap();

        let result = registry.register::<Alpha, _>(Noop);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == "alpha"));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = TypedRegistry::new();
        registry.register::<Beta, _>(Noop).unwrap();
        registry.register::<Alpha, _>(Noop).unwrap();

        assert_eq!(registry.registered_types(), vec!["alpha", "beta"]);
        assert!(registry.contains("beta"));
        assert!(!registry.contains("gamma"));
    }
}
