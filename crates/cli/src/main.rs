//! Mentor CLI
//!
//! Command-line front end for the support chatbot engine: mirror a knowledge
//! base, answer questions, serve a JSON-lines chat loop, and show diagnostics.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, ChatCommand, StatsCommand, SyncCommand};
use mentor_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Mentor - hybrid FAQ and retrieval-augmented support chatbot
#[derive(Parser, Debug)]
#[command(name = "mentor")]
#[command(about = "Hybrid FAQ and retrieval-augmented support chatbot", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "MENTOR_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "MENTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Generation provider whose endpoint is used when a base names none
    #[arg(short, long, global = true, env = "MENTOR_PROVIDER")]
    provider: Option<String>,

    /// Generation model
    #[arg(short, long, global = true, env = "MENTOR_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mirror a knowledge base from storage and rebuild its index
    Sync(SyncCommand),

    /// Answer a single question
    Ask(AskCommand),

    /// Serve JSON-lines chat requests on stdin
    Chat(ChatCommand),

    /// Show knowledge base and engine statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(
        config.log_level.as_deref(),
        config.no_color,
        logging::LogFormat::parse(&config.log_format),
    )?;
    config.validate()?;

    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {} ({})", config.provider, config.model);

    config.ensure_state_dir()?;

    let command_name = match &cli.command {
        Commands::Sync(_) => "sync",
        Commands::Ask(_) => "ask",
        Commands::Chat(_) => "chat",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Sync(cmd) => cmd.execute(&config).await,
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Chat(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::debug!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
