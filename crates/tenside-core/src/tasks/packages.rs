use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::PackageManager;
use crate::domain::TaskError;
use crate::typed::{Handler, Task, TaskOutput};

/// Update all packages, or only the listed ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Upgrade {
    #[serde(default)]
    pub packages: Option<Vec<String>>,
}

impl Task for Upgrade {
    const TYPE: &'static str = "upgrade";
}

/// `package` is `[name]` or `[name, constraint]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirePackage {
    pub package: Vec<String>,
}

impl Task for RequirePackage {
    const TYPE: &'static str = "require-package";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePackage {
    pub package: String,
}

impl Task for RemovePackage {
    const TYPE: &'static str = "remove-package";
}

pub struct UpgradeHandler {
    pm: Arc<PackageManager>,
}

impl UpgradeHandler {
    pub fn new(pm: Arc<PackageManager>) -> Self {
        Self { pm }
    }
}

#[async_trait]
impl Handler<Upgrade> for UpgradeHandler {
    async fn handle(&self, task: Upgrade, out: &mut TaskOutput) -> Result<(), TaskError> {
        let packages = task.packages.unwrap_or_default();
        info!(task_id = %out.task_id(), packages = ?packages, "upgrading packages");

        let mut args = vec!["update".to_string()];
        args.extend(packages);
        out.run_command(self.pm.command(&args)).await
    }
}

pub struct RequirePackageHandler {
    pm: Arc<PackageManager>,
}

impl RequirePackageHandler {
    pub fn new(pm: Arc<PackageManager>) -> Self {
        Self { pm }
    }
}

#[async_trait]
impl Handler<RequirePackage> for RequirePackageHandler {
    async fn handle(&self, task: RequirePackage, out: &mut TaskOutput) -> Result<(), TaskError> {
        let requirement = match task.package.as_slice() {
            [name] if !name.is_empty() => name.clone(),
            [name, constraint] if !name.is_empty() => format!("{name}:{constraint}"),
            _ => {
                return Err(TaskError::InvalidPayload(
                    "package must be [name] or [name, constraint]".to_string(),
                ));
            }
        };
        info!(task_id = %out.task_id(), %requirement, "requiring package");

        out.run_command(self.pm.command(["require", requirement.as_str()]))
            .await
    }
}

pub struct RemovePackageHandler {
    pm: Arc<PackageManager>,
}

impl RemovePackageHandler {
    pub fn new(pm: Arc<PackageManager>) -> Self {
        Self { pm }
    }
}

#[async_trait]
impl Handler<RemovePackage> for RemovePackageHandler {
    async fn handle(&self, task: RemovePackage, out: &mut TaskOutput) -> Result<(), TaskError> {
        if task.package.is_empty() {
            return Err(TaskError::InvalidPayload("package must not be empty".to_string()));
        }
        info!(task_id = %out.task_id(), package = %task.package, "removing package");

        out.run_command(self.pm.command(["remove", task.package.as_str()]))
            .await
    }
}
