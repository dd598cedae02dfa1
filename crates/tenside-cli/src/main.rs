mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

fn main() -> ExitCode {
    match run_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tenside error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run_main() -> anyhow::Result<ExitCode> {
    let args = cli::parse();
    logging::init_logging(args.verbose)?;
    commands::dispatch(args)
}
