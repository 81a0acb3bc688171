//! Extract command - extract invoice data from a single document.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use recon_core::models::catalog::TenantId;
use recon_core::ocr::RawDocument;
use recon_core::service::ExtractionService;

use super::{OutputFormat, build_recognizer, format_extraction, load_config, load_store, mime_for};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Override the declared MIME type
    #[arg(long)]
    mime: Option<String>,

    /// State file whose catalog is used for suggestions
    #[arg(long)]
    state: Option<PathBuf>,

    /// Tenant whose products are suggested
    #[arg(short, long, default_value = "1")]
    tenant: i64,

    /// Show extraction confidence
    #[arg(long)]
    show_confidence: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let mime = args.mime.clone().unwrap_or_else(|| mime_for(&args.input).to_string());
    info!("Processing {} as {}", args.input.display(), mime);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Recognizing document...");

    let document = RawDocument::new(fs::read(&args.input)?, mime);
    let service = ExtractionService::new(build_recognizer(&config), &config);

    let result = match &args.state {
        Some(state) => {
            let catalog = load_store(state)?.catalog()?;
            service
                .extract_with_suggestions(document, &catalog, TenantId(args.tenant))
                .await?
        }
        None => service.extract(document).await?,
    };

    pb.finish_and_clear();

    let output = format_extraction(&result, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!("{} Output written to {}", style("✓").green(), output_path.display());
    } else {
        println!("{}", output);
    }

    if !result.success {
        eprintln!(
            "{} Extraction failed: {}",
            style("✗").red(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    } else if args.show_confidence {
        eprintln!("{} Extraction confidence: {:.1}%", style("ℹ").blue(), result.confidence * 100.0);
    }

    debug!("Total processing time: {:?}", start.elapsed());
    Ok(())
}
