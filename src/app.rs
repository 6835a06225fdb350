use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::commands;
use crate::context::AppContext;
use crate::error::AppResult;

pub async fn run(cli: Cli) -> AppResult<()> {
    let Cli {
        profile,
        json,
        verbose,
        command,
    } = cli;

    init_logging(verbose);
    let ctx = AppContext::bootstrap(profile, json)?;

    match command {
        Command::Analyze(args) => commands::analyze::run(&ctx, args).await,
        Command::Auth(args) => commands::auth::run(&ctx, args.command).await,
    }
}

/// `RUST_LOG` wins; otherwise each `-v` raises the level one step from warn.
pub fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("inbox_insights={default_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
