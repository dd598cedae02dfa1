//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! - Builder パターン
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use crate::app::queue::{TaskQueue, WorkerCommand, task_run_lock};
use crate::app::runner::TaskRunner;
use crate::config::Settings;
use crate::domain::TaskError;
use crate::impls::{FileTaskStore, OsProcessSpawner};
use crate::ports::TaskStore;
use crate::tasks::{self, PackageManager};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .with_builtin_tasks(PackageManager::from_settings(&settings))?
///     .expect_tasks(&BUILTIN_TASKS)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// `upgrade`, `require-package` and `remove-package`.
    pub fn with_builtin_tasks(mut self, package_manager: PackageManager) -> Result<Self, RegistryError> {
        tasks::register_builtin(&mut self.registry, package_manager)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        Ok(App {
            registry: Arc::new(self.registry),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は registry を保持し、設定から各サービスを組み立てる
pub struct App {
    registry: Arc<TypedRegistry>,
}

impl App {
    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }

    /// Store under `<data_dir>/tasks`, accepting exactly the registered types.
    pub fn open_store(&self, settings: &Settings) -> Result<Arc<dyn TaskStore>, TaskError> {
        let store = FileTaskStore::open(settings.tasks_dir(), self.registry.registered_types())?;
        Ok(Arc::new(store))
    }

    pub fn queue(&self, settings: &Settings) -> Result<TaskQueue, TaskError> {
        Ok(TaskQueue::new(
            self.open_store(settings)?,
            Arc::new(OsProcessSpawner::for_forking(settings.forking_available)),
            task_run_lock(settings),
            WorkerCommand::from_settings(settings),
        ))
    }

    pub fn runner(&self, settings: &Settings) -> Result<TaskRunner, TaskError> {
        Ok(
            TaskRunner::new(self.open_store(settings)?, self.registry.clone())
                .with_log_dir(settings.log_dir.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, TaskType};
    use crate::tasks::BUILTIN_TASKS;
    use tempfile::tempdir;

    fn settings(home: &std::path::Path) -> Settings {
        Settings::from_toml(home, "cli_executable = \"/usr/local/bin/tenside\"").unwrap()
    }

    #[test]
    fn builtin_tasks_satisfy_expectations() {
        let app = AppBuilder::new()
            .with_builtin_tasks(PackageManager::new("composer", "/srv/app"))
            .unwrap()
            .expect_tasks(&BUILTIN_TASKS)
            .build()
            .unwrap();

        assert_eq!(
            app.registry().registered_types(),
            vec!["remove-package", "require-package", "upgrade"]
        );
    }

    #[test]
    fn missing_expected_types_fail_the_build() {
        let result = AppBuilder::new()
            .expect_tasks(&["upgrade", "self-update"])
            .build();

        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["upgrade", "self-update"]
        ));
    }

    #[test]
    fn double_registration_is_reported() {
        let result = AppBuilder::new()
            .with_builtin_tasks(PackageManager::new("composer", "/srv/app"))
            .unwrap()
            .with_builtin_tasks(PackageManager::new("composer", "/srv/app"));

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn queue_and_runner_share_the_store() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let app = AppBuilder::new()
            .with_builtin_tasks(PackageManager::from_settings(&settings))
            .unwrap()
            .build()
            .unwrap();

        let queue = app.queue(&settings).unwrap();
        let view = queue
            .enqueue(&TaskType::new("upgrade"), Metadata::new())
            .unwrap();

        let store = app.open_store(&settings).unwrap();
        assert_eq!(store.ids().unwrap().len(), 1);
        assert!(dir.path().join("tenside").join("tasks").join(format!("{}.json", view.id)).exists());

        let err = queue
            .enqueue(&TaskType::new("unknown-type"), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownTaskType(_)));
    }
}
