//! ehnet CLI - fetch pages from the E-Hentai origin family
//!
//! Entry point of the `ehnet` binary. Every request goes through the same
//! retrying, fronting-aware transport the library provides, with a cookie
//! jar persisted between runs.

mod cli;
mod config;
mod error;
mod handlers;
mod logging;
mod output;

use cli::{Cli, Commands};
use colored::control;
use config::Config;
use error::Result;
use handlers::utils::{cancel_on_ctrl_c, Session};
use logging::{timing::Timer, LoggingConfig};
use output::OutputWriter;
use std::process;
use tracing::instrument;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    control::set_override(cli.use_color());

    let config = match Config::load_with_file(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", error::format_error(&e, control::SHOULD_COLORIZE.should_colorize()));
            process::exit(e.exit_code());
        }
    };

    let guard = match init_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let code = match run(cli, config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{}", error::format_error(&e, control::SHOULD_COLORIZE.should_colorize()));
            if e.should_show_help() {
                eprintln!("\nFor more information, try '--help'");
            }
            e.exit_code()
        }
    };

    // process::exit skips destructors; flush the log file first
    drop(guard);
    process::exit(code);
}

/// Main application logic
#[instrument(skip_all, fields(command = ?cli.command))]
async fn run(cli: Cli, config: Config) -> Result<()> {
    let _timer = Timer::new("cli_execution");
    let mut output = OutputWriter::new(cli.output, cli.use_color(), cli.quiet);

    tracing::info!(verbosity = cli.verbosity_level(), "executing command");

    match cli.command {
        Commands::Get(args) => {
            let session = Session::open(&config, cli.no_cookies)?;
            let cancel = cancel_on_ctrl_c();
            let result = handlers::handle_get(args, &config, &session, &cancel, &mut output).await;
            session.finish(result)
        }
        Commands::PostForm(args) => {
            let session = Session::open(&config, cli.no_cookies)?;
            let cancel = cancel_on_ctrl_c();
            let result =
                handlers::handle_post_form(args, &config, &session, &cancel, &mut output).await;
            session.finish(result)
        }
        Commands::PostJson(args) => {
            let session = Session::open(&config, cli.no_cookies)?;
            let cancel = cancel_on_ctrl_c();
            let result =
                handlers::handle_post_json(args, &config, &session, &cancel, &mut output).await;
            session.finish(result)
        }
        Commands::Hosts(args) => handlers::handle_hosts(args, &config, &mut output).await,
        Commands::Cookies(args) => {
            let session = Session::open(&config, cli.no_cookies)?;
            let result = handlers::handle_cookies(args, &session, &mut output);
            session.finish(result)
        }
        Commands::Config(args) => handlers::handle_config(args, &config, &mut output),
        Commands::Completions(args) => {
            handlers::handle_completions(args, &mut std::io::stdout())
        }
    }
}

/// Initialize the logging system from flags, the config file and the environment
fn init_logging(cli: &Cli, config: &Config) -> Result<Option<WorkerGuard>> {
    let mut logging_config = LoggingConfig::from_verbosity(cli.verbosity_level());
    logging_config.apply_settings(&config.logging, cli.verbosity_level());
    logging_config.merge_with_env();

    if cli.quiet {
        logging_config.level = "error".to_string();
    }

    logging::init_logging(logging_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["ehnet", "-vv", "hosts", "exhentai.org"]);
        assert_eq!(cli.verbosity_level(), 2);
        assert!(matches!(cli.command, Commands::Hosts(_)));

        let cli = Cli::parse_from(["ehnet", "--quiet", "--no-cookies", "get", "https://e-hentai.org/"]);
        assert_eq!(cli.verbosity_level(), 0);
        assert!(cli.no_cookies);
    }

    #[test]
    fn test_nested_subcommands() {
        let cli = Cli::parse_from(["ehnet", "cookies", "show", "--reveal"]);
        match cli.command {
            Commands::Cookies(args) => {
                assert!(matches!(args.action, cli::CookiesAction::Show(ref show) if show.reveal))
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["ehnet", "config", "show", "--format", "toml"]);
        assert!(matches!(cli.command, Commands::Config(_)));
    }
}
