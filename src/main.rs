use std::process::ExitCode;
use studydesk::commands::api::handle_api_command;
use studydesk::commands::probe::handle_probe_command;
use studydesk::commands::run::handle_run_command;
use studydesk::commands::{Cli, Commands};
use studydesk::utils::config_paths::default_log_file;
use studydesk::utils::init_logger;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_cli();
    let command = cli.command();

    // a run always keeps a log file so backend output survives the session
    let log_file = match &command {
        Commands::Run(_) => cli.log_file.clone().or_else(|| Some(default_log_file())),
        _ => cli.log_file.clone(),
    };
    if let Err(err) = init_logger(cli.log_level.as_deref(), log_file) {
        eprintln!("failed to initialize logging: {}", err);
    }

    let config_path = cli.config.as_deref();
    match command {
        Commands::Run(args) => handle_run_command(&args, config_path).await,
        Commands::Probe { url, timeout_ms } => {
            handle_probe_command(url.as_deref(), timeout_ms, config_path).await
        }
        Commands::Api {
            method,
            path,
            data,
            url,
        } => handle_api_command(method, &path, data.as_ref(), url.as_deref(), config_path).await,
    }
}
