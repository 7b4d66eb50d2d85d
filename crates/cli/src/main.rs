//! Stepwise CLI: the main entry point.
//!
//! Commands:
//! - `config`   Create, show or locate the configuration file
//! - `session`  List, inspect and delete stored sessions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{config_cmd, load_config, session, CliResult};

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise: step-by-step LLM execution engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ~/.stepwise/config.toml
    #[arg(short, long, global = true, env = "STEPWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect stored sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the default configuration path
    Path,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List stored sessions
    List,
    /// Show one session's steps
    Show {
        id: String,
        /// Print the stored JSON document
        #[arg(long)]
        json: bool,
    },
    /// Delete a session
    Delete { id: String },
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                let path = cli
                    .config
                    .unwrap_or_else(|| stepwise_config::AppConfig::config_dir().join("config.toml"));
                config_cmd::init(&path, force, &mut out)?
            }
            ConfigAction::Show => config_cmd::show(&load_config(cli.config.as_deref())?, &mut out)?,
            ConfigAction::Path => config_cmd::path(&mut out)?,
        },
        Commands::Session { action } => {
            let config = load_config(cli.config.as_deref())?;
            let store = stepwise_session::open_store(&config.sessions);
            match action {
                SessionAction::List => session::list(store.as_ref(), &mut out).await?,
                SessionAction::Show { id, json } => {
                    session::show(store.as_ref(), &id, json, &mut out).await?
                }
                SessionAction::Delete { id } => session::delete(store.as_ref(), &id, &mut out).await?,
            }
        }
    }

    Ok(())
}
