use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::context::AppContext;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI - inspect and maintain shared conversation history", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/parley/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one conversation as JSON
    Show { id: String },
    /// Search titles and message content
    Search {
        term: String,
        #[arg(long, conflicts_with = "messages_only")]
        titles_only: bool,
        #[arg(long)]
        messages_only: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show history statistics
    Stats,
    /// Delete a conversation
    Delete { id: String },
    /// Rename a conversation
    Rename { id: String, title: String },
    /// Migrate chat history stored by older releases
    Migrate {
        /// Only report whether legacy data exists
        #[arg(long)]
        check: bool,
        /// Remove legacy keys after migrating
        #[arg(long)]
        delete_legacy: bool,
    },
    /// Write the history as JSON to stdout
    Export,
    /// Import conversations from a JSON file
    Import { file: PathBuf },
    /// Print every history refresh until interrupted
    Watch,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = AppContext::open(cli.config.as_deref())?;
    if !matches!(cli.command, Commands::Migrate { .. }) {
        ctx.auto_migrate().await;
    }

    match cli.command {
        Commands::List { limit } => commands::history::list(&ctx, limit).await?,
        Commands::Show { id } => commands::history::show(&ctx, &id).await?,
        Commands::Search {
            term,
            titles_only,
            messages_only,
            limit,
        } => commands::history::search(&ctx, &term, titles_only, messages_only, limit).await?,
        Commands::Stats => commands::history::stats(&ctx).await?,
        Commands::Delete { id } => commands::history::delete(&ctx, &id).await?,
        Commands::Rename { id, title } => commands::history::rename(&ctx, &id, &title).await?,
        Commands::Migrate {
            check,
            delete_legacy,
        } => commands::migrate::run(&ctx, check, delete_legacy).await?,
        Commands::Export => commands::history::export(&ctx).await?,
        Commands::Import { file } => commands::history::import(&ctx, &file).await?,
        Commands::Watch => commands::watch::run(&ctx).await?,
    }

    Ok(())
}
