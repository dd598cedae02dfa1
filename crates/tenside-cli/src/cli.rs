//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tenside_core::config::HOME_ENV;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tenside",
    version,
    about = "Queue package-manager tasks and run them one at a time in the background.",
    long_about = None
)]
pub struct CliArgs {
    /// Home directory holding `tenside.toml` (default: current directory).
    #[arg(long, global = true, env = HOME_ENV, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// More logging on stderr (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Never prompt. Tasks always run non-interactively; the flag is accepted
    /// so worker command lines stay stable.
    #[arg(long, global = true)]
    pub no_interaction: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List every task with its full output.
    List,

    /// Show one task.
    Show {
        id: String,
        /// Return output from this byte offset on.
        #[arg(long, value_name = "BYTES")]
        offset: Option<u64>,
    },

    /// Queue a task from a JSON body such as `{"type":"upgrade"}` (`-` reads stdin).
    Add { payload: String },

    /// Delete a task that is not running.
    Delete { id: String },

    /// Start the next pending task.
    Run,

    /// Execute one task in this process (worker entry point).
    #[command(name = "runtask")]
    RunTask {
        id: String,
        /// Inherited descriptor already holding the task-run lock.
        #[arg(long, value_name = "FD")]
        lock_fd: Option<i32>,
        /// The launcher holds the task-run lock until this process exits.
        #[arg(long, conflicts_with = "lock_fd")]
        lock_held: bool,
    },
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
