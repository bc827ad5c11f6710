//! `studydesk run`

use crate::commands::parser::RunArgs;
use crate::config::ShellConfig;
use crate::error::{ShellError, ShellResult};
use crate::shell::{self, ShellExit, ShellHost};
use crate::signal::ShutdownListener;
use std::path::Path;
use std::process::ExitCode;

pub async fn handle_run_command(args: &RunArgs, config_path: Option<&Path>) -> ExitCode {
    match run(args, config_path).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(ShellExit::StartupFailure.code())
        }
    }
}

async fn run(args: &RunArgs, config_path: Option<&Path>) -> ShellResult<ShellExit> {
    let mut config = ShellConfig::load(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    let install_dir = shell::install_dir().map_err(ShellError::InstallDir)?;
    let host = ShellHost::new(&config, &install_dir);
    let mut shutdown = ShutdownListener::with_os_signals().map_err(ShellError::Signal)?;
    Ok(host.run(&mut shutdown).await)
}
