//! Reconcile and retry commands - apply confirmed invoices to stock.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use recon_core::models::catalog::{InvoiceId, TenantId};
use recon_core::models::inventory::ConfirmedInvoice;
use recon_core::reconcile::ReconciliationEngine;

use super::StateLock;

/// Arguments for the reconcile command.
#[derive(Args)]
pub struct ReconcileArgs {
    /// Confirmed invoice (JSON)
    #[arg(required = true)]
    input: PathBuf,

    /// State file holding catalog, stock and ledger
    #[arg(short, long)]
    state: PathBuf,

    /// Tenant the invoice belongs to
    #[arg(short, long)]
    tenant: i64,
}

/// Arguments for the retry command.
#[derive(Args)]
pub struct RetryArgs {
    /// Stored invoice id
    #[arg(required = true)]
    invoice_id: i64,

    /// State file holding catalog, stock and ledger
    #[arg(short, long)]
    state: PathBuf,

    /// Tenant the invoice belongs to
    #[arg(short, long)]
    tenant: i64,

    /// Leading characters of a line name used for the substring match
    #[arg(long, default_value = "15")]
    match_prefix: usize,
}

pub async fn run_reconcile(args: ReconcileArgs) -> anyhow::Result<()> {
    let content = fs::read_to_string(&args.input)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", args.input.display(), e))?;
    let confirmed: ConfirmedInvoice = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid confirmed invoice {}: {}", args.input.display(), e))?;

    let state = StateLock::acquire(&args.state).await?;
    let store = state.load()?;
    let engine = ReconciliationEngine::new(store.clone());
    let outcome = engine.reconcile(&confirmed, TenantId(args.tenant)).await?;
    state.save(&store).await?;
    drop(state);

    info!("State written to {}", args.state.display());
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.discrepancies.is_empty() {
        eprintln!(
            "{} {} lines need a product; run 'recon retry {}' once they exist.",
            style("!").yellow(),
            outcome.discrepancies.len(),
            outcome.invoice_id
        );
    }
    Ok(())
}

pub async fn run_retry(args: RetryArgs) -> anyhow::Result<()> {
    if !args.state.exists() {
        anyhow::bail!("State file not found: {}", args.state.display());
    }

    let state = StateLock::acquire(&args.state).await?;
    let store = state.load()?;
    let engine = ReconciliationEngine::new(store.clone()).with_match_prefix(args.match_prefix);
    let outcome = engine
        .retry_unresolved(InvoiceId(args.invoice_id), TenantId(args.tenant))
        .await?;
    state.save(&store).await?;
    drop(state);

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
