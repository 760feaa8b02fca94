//! Basket CLI
//!
//! Command-line interface for Basket - shared shopping lists.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use basket_core::Config;

mod commands;
mod output;
mod prompt;

use commands::Session;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "basket")]
#[command(about = "Basket - shopping lists that stay in sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Act as this user (overrides config and BASKET_USER)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show all lists with their progress
    #[command(alias = "ls")]
    Lists,
    /// Manage lists
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
    /// Manage items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Follow changes live
    Watch {
        /// Watch one list instead of the dashboard (full ID or prefix)
        list: Option<String>,
    },
    /// Show user, storage, and totals
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Create a new list
    #[command(alias = "add")]
    Create {
        /// List name
        name: String,
        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Show a list and its items
    Show {
        /// List ID (full ID or prefix)
        id: String,
    },
    /// Rename a list or change its description
    Edit {
        /// List ID (full ID or prefix)
        id: String,
        /// New name
        #[arg(short, long)]
        name: Option<String>,
        /// New description
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        /// Remove the description
        #[arg(long)]
        clear_description: bool,
    },
    /// Delete a list and all of its items
    #[command(alias = "rm")]
    Delete {
        /// List ID (full ID or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add an item to a list
    Add {
        /// List ID (full ID or prefix)
        list: String,
        /// Item name
        name: String,
        /// How many
        #[arg(short = 'n', long, default_value_t = 1)]
        quantity: u32,
    },
    /// Rename an item or change its quantity
    Edit {
        /// Item ID (full ID or prefix)
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New quantity
        #[arg(short = 'n', long)]
        quantity: Option<u32>,
    },
    /// Mark an item done, or not done again
    Toggle {
        /// Item ID (full ID or prefix)
        id: String,
    },
    /// Delete an item
    #[command(alias = "rm")]
    Delete {
        /// Item ID (full ID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, user, item_settle_ms, list_settle_ms,
        /// request_timeout_secs, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work without a user or a store
    if let Some(Commands::Config { command }) = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config);

    let session = Session::open(config, cli.user.clone()).await?;

    let result = match cli.command.unwrap_or(Commands::Lists) {
        Commands::Lists => commands::list::list_all(&session.reconciler, &output),
        Commands::List { command } => handle_list_command(command, &session, &output).await,
        Commands::Item { command } => handle_item_command(command, &session, &output).await,
        Commands::Watch { list } => commands::watch::watch(&session, list, &output).await,
        Commands::Status => commands::status::show(&session, &output),
        Commands::Config { .. } => Ok(()), // Handled above
    };

    session.reconciler.close();
    result
}

async fn handle_list_command(command: ListCommands, session: &Session, output: &Output) -> Result<()> {
    let reconciler = &session.reconciler;
    match command {
        ListCommands::Create { name, description } => {
            commands::list::create(reconciler, name, description, output).await
        }
        ListCommands::Show { id } => commands::list::show(reconciler, id, output),
        ListCommands::Edit {
            id,
            name,
            description,
            clear_description,
        } => {
            commands::list::edit(reconciler, id, name, description, clear_description, output)
                .await
        }
        ListCommands::Delete { id } => commands::list::delete(reconciler, id, output).await,
    }
}

async fn handle_item_command(command: ItemCommands, session: &Session, output: &Output) -> Result<()> {
    let reconciler = &session.reconciler;
    match command {
        ItemCommands::Add {
            list,
            name,
            quantity,
        } => commands::item::add(reconciler, list, name, quantity, output).await,
        ItemCommands::Edit { id, name, quantity } => {
            commands::item::edit(reconciler, id, name, quantity, output).await
        }
        ItemCommands::Toggle { id } => commands::item::toggle(reconciler, id, output).await,
        ItemCommands::Delete { id } => commands::item::delete(reconciler, id, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if BASKET_LOG environment variable is set.
/// Logs to config.log_file if set, else stderr.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("BASKET_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "basket_core={},basket_cli={}",
        log_level, log_level
    ));

    // Ignore the error if already initialized
    match config.log_file {
        Some(ref log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    debug!("Logging initialized at level {}", log_level);
}
