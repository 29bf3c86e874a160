// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lorebook command-line entry point.
//!
//! Read-only inspection of persisted guild knowledge and configuration checks.

mod config_cmd;
mod inspect;

use clap::{Parser, Subcommand};

/// Lorebook - per-guild chat knowledge base.
#[derive(Parser, Debug)]
#[command(name = "lorebook", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// List guilds and their stored facts.
    Inspect {
        /// Only show this guild.
        #[arg(long)]
        guild: Option<String>,
        /// Output JSON for scripting.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Validate and print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match lorebook_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            lorebook_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.agent.log_level);

    let result = match cli.command {
        Some(Commands::Inspect { guild, json, plain }) => {
            inspect::run_inspect(&config, guild.as_deref(), json, plain).await
        }
        Some(Commands::Config) => config_cmd::run_config(&config),
        None => {
            println!("lorebook: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("lorebook: {e}");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lorebook={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
