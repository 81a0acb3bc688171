//! CLI for invoice extraction and stock reconciliation.

mod commands;
mod engine;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{batch, config, extract, parse, reconcile};

/// Invoice intake - extract invoice data and reconcile it into stock
#[derive(Parser)]
#[command(name = "recon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract invoice data from a PDF or image
    Extract(extract::ExtractArgs),

    /// Extract invoice data from already recognized text
    Parse(parse::ParseArgs),

    /// Extract invoice data from multiple files
    Batch(batch::BatchArgs),

    /// Apply a confirmed invoice to stock
    Reconcile(reconcile::ReconcileArgs),

    /// Re-attempt the unresolved lines of a stored invoice
    Retry(reconcile::RetryArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Extract(args) => extract::run(args, config_path).await,
        Commands::Parse(args) => parse::run(args, config_path).await,
        Commands::Batch(args) => batch::run(args, config_path).await,
        Commands::Reconcile(args) => reconcile::run_reconcile(args).await,
        Commands::Retry(args) => reconcile::run_retry(args).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
