//! Settings - `tenside.toml` の読み込み
//!
//! The file lives in the home directory and every field is optional.
//! Relative paths are resolved against the home directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::domain::TaskError;

pub const CONFIG_FILE: &str = "tenside.toml";
pub const HOME_ENV: &str = "TENSIDE_HOME";

/// Raw file contents, before defaults and path resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    forking_available: Option<bool>,
    lock_handoff: Option<bool>,
    cli_executable: Option<PathBuf>,
    worker_arguments: Vec<String>,
    worker_environment: BTreeMap<String, String>,
    package_manager: Option<String>,
    package_manager_arguments: Vec<String>,
    claim_timeout_ms: Option<u64>,
    lock_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub home: PathBuf,
    /// Queue state and the task-run lock.
    pub data_dir: PathBuf,
    /// Per-task log files and worker stderr logs.
    pub log_dir: PathBuf,
    /// Start workers detached; otherwise `run` blocks until the worker exits.
    pub forking_available: bool,
    /// Pass the held task-run lock to the worker instead of releasing it.
    pub lock_handoff: bool,
    /// Binary started as the worker (`<cli> runtask <id>`).
    pub cli_executable: PathBuf,
    /// Inserted before the worker subcommand.
    pub worker_arguments: Vec<String>,
    pub worker_environment: BTreeMap<String, String>,
    pub package_manager: String,
    /// Appended to every package-manager invocation.
    pub package_manager_arguments: Vec<String>,
    pub claim_timeout: Duration,
    pub lock_wait: Duration,
}

impl Settings {
    /// Read `<home>/tenside.toml`, falling back to defaults when it is absent.
    pub fn load(home: impl Into<PathBuf>) -> Result<Self, TaskError> {
        let home = home.into();
        let path = home.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading settings");
                Self::from_toml(home, &text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Self::from_toml(home, "")
            }
            Err(e) => Err(TaskError::storage(&path, e)),
        }
    }

    pub fn from_toml(home: impl Into<PathBuf>, text: &str) -> Result<Self, TaskError> {
        let home = home.into();
        let file: SettingsFile = toml::from_str(text)
            .map_err(|e| TaskError::Config(format!("{CONFIG_FILE}: {e}")))?;

        let cli_executable = match file.cli_executable {
            Some(path) => resolve(&home, path),
            None => std::env::current_exe()
                .map_err(|e| TaskError::Config(format!("cannot determine cli executable: {e}")))?,
        };

        let package_manager = file.package_manager.unwrap_or_else(|| "composer".to_string());
        if package_manager.trim().is_empty() {
            return Err(TaskError::Config(
                "package_manager must not be empty".to_string(),
            ));
        }

        let data_dir = file
            .data_dir
            .map(|p| resolve(&home, p))
            .unwrap_or_else(|| home.join("tenside"));
        let log_dir = file
            .log_dir
            .map(|p| resolve(&home, p))
            .unwrap_or_else(|| data_dir.join("logs"));

        Ok(Self {
            data_dir,
            log_dir,
            forking_available: file.forking_available.unwrap_or(cfg!(unix)),
            // descriptor inheritance is only wired up for unix
            lock_handoff: cfg!(unix) && file.lock_handoff.unwrap_or(true),
            cli_executable,
            worker_arguments: file.worker_arguments,
            worker_environment: file.worker_environment,
            package_manager,
            package_manager_arguments: file.package_manager_arguments,
            claim_timeout: Duration::from_millis(file.claim_timeout_ms.unwrap_or(10_000)),
            lock_wait: Duration::from_millis(file.lock_wait_ms.unwrap_or(10_000)),
            home,
        })
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }
}

fn resolve(home: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_hang_off_home() {
        let settings = Settings::from_toml("/srv/app", "").unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/srv/app/tenside"));
        assert_eq!(settings.log_dir, PathBuf::from("/srv/app/tenside/logs"));
        assert_eq!(settings.tasks_dir(), PathBuf::from("/srv/app/tenside/tasks"));
        assert_eq!(settings.package_manager, "composer");
        assert_eq!(settings.claim_timeout, Duration::from_secs(10));
        assert_eq!(settings.forking_available, cfg!(unix));
        assert_eq!(settings.lock_handoff, cfg!(unix));
    }

    #[test]
    fn file_values_override_defaults() {
        let text = r#"
            data_dir = "var"
            log_dir = "/var/log/tenside"
            forking_available = false
            lock_handoff = false
            cli_executable = "bin/tenside"
            worker_arguments = ["--quiet-start"]
            package_manager = "/usr/local/bin/composer"
            package_manager_arguments = ["--no-ansi"]
            claim_timeout_ms = 250
            lock_wait_ms = 500

            [worker_environment]
            COMPOSER_HOME = "/tmp/composer"
        "#;
        let settings = Settings::from_toml("/srv/app", text).unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/srv/app/var"));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/tenside"));
        assert!(!settings.forking_available);
        assert!(!settings.lock_handoff);
        assert_eq!(settings.cli_executable, PathBuf::from("/srv/app/bin/tenside"));
        assert_eq!(settings.worker_arguments, vec!["--quiet-start"]);
        assert_eq!(settings.package_manager_arguments, vec!["--no-ansi"]);
        assert_eq!(settings.claim_timeout, Duration::from_millis(250));
        assert_eq!(settings.lock_wait, Duration::from_millis(500));
        assert_eq!(
            settings.worker_environment.get("COMPOSER_HOME").map(String::as_str),
            Some("/tmp/composer")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::from_toml("/srv/app", "forking = true").unwrap_err();
        assert!(matches!(err, TaskError::Config(msg) if msg.contains("tenside.toml")));
    }

    #[test]
    fn empty_package_manager_is_rejected() {
        assert!(matches!(
            Settings::from_toml("/srv/app", "package_manager = \" \""),
            Err(TaskError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file_from_home() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "package_manager = \"echo\"\n").unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.package_manager, "echo");
        assert_eq!(settings.home, dir.path());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.data_dir, dir.path().join("tenside"));
    }
}
