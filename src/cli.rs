use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "insights",
    version,
    about = "Mailbox analytics: reply latency, priority queues, sentiment and activity"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "default",
        help = "Profile name to use"
    )]
    pub profile: String,
    #[arg(long, global = true, help = "Emit JSON output")]
    pub json: bool,
    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Verbose logging")]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Analyze(AnalyzeArgs),
    Auth(AuthArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(long, help = "JSON array of exported messages")]
    pub messages: PathBuf,
    #[arg(long, help = "JSON array of exported calendar events")]
    pub events: Option<PathBuf>,
    #[arg(long, help = "Window length in days (defaults to profile setting)")]
    pub window: Option<u32>,
    #[arg(long, help = "Your own address, used to tell inbound from outbound")]
    pub user: Option<String>,
}

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Show the stored credential's lifecycle state.
    Status,
    /// Refresh now, regardless of expiry.
    Refresh,
    /// Store a fresh authorization grant from a JSON file.
    Import(ImportArgs),
    /// Override the stored expiry (seconds, milliseconds or ISO-8601).
    ExpireAt(ExpireAtArgs),
    /// Delete the stored credential.
    Logout,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(help = "Token response JSON (access_token, refresh_token, expires_in or expires_at)")]
    pub grant: PathBuf,
}

#[derive(Debug, Args)]
pub struct ExpireAtArgs {
    #[arg(allow_hyphen_values = true, help = "New expiry, or `never` to clear it")]
    pub value: String,
}
