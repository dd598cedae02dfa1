//! Built-in tasks
//!
//! Package operations are delegated to an external package-manager binary
//! (`composer` unless configured otherwise), run in the home directory.

mod packages;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::process::Command;

use crate::config::Settings;
use crate::typed::{RegistryError, TypedRegistry};

pub use self::packages::{
    RemovePackage, RemovePackageHandler, RequirePackage, RequirePackageHandler, Upgrade,
    UpgradeHandler,
};

/// How to invoke the package manager.
#[derive(Debug, Clone)]
pub struct PackageManager {
    program: String,
    extra_args: Vec<String>,
    working_dir: PathBuf,
}

impl PackageManager {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Configured binary and arguments, run in the home directory.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.package_manager.clone(), settings.home.clone())
            .with_extra_args(settings.package_manager_arguments.clone())
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// `<program> <args..> <extra_args..> --no-interaction`
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .args(&self.extra_args)
            .arg("--no-interaction")
            .current_dir(&self.working_dir);
        cmd
    }
}

/// Type names of every built-in task.
pub const BUILTIN_TASKS: [&str; 3] = [
    <Upgrade as crate::typed::Task>::TYPE,
    <RequirePackage as crate::typed::Task>::TYPE,
    <RemovePackage as crate::typed::Task>::TYPE,
];

pub fn register_builtin(
    registry: &mut TypedRegistry,
    package_manager: PackageManager,
) -> Result<(), RegistryError> {
    let pm = Arc::new(package_manager);
    registry.register::<Upgrade, _>(UpgradeHandler::new(pm.clone()))?;
    registry.register::<RequirePackage, _>(RequirePackageHandler::new(pm.clone()))?;
    registry.register::<RemovePackage, _>(RemovePackageHandler::new(pm))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtin_covers_every_builtin_type() {
        let mut registry = TypedRegistry::new();
        register_builtin(&mut registry, PackageManager::new("composer", "/srv/app")).unwrap();

        for task_type in BUILTIN_TASKS {
            assert!(registry.contains(task_type), "{task_type} missing");
        }
        assert_eq!(registry.registered_types().len(), BUILTIN_TASKS.len());
    }

    #[test]
    fn command_appends_extra_args_and_no_interaction() {
        let pm = PackageManager::new("composer", "/srv/app").with_extra_args(vec!["--no-ansi".into()]);
        let cmd = pm.command(["update"]);
        let std = cmd.as_std();

        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(std.get_program(), "composer");
        assert_eq!(args, vec!["update", "--no-ansi", "--no-interaction"]);
        assert_eq!(std.get_current_dir(), Some(std::path::Path::new("/srv/app")));
    }
}
