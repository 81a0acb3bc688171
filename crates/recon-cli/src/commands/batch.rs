//! Batch command - extract invoice data from multiple documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use recon_core::models::invoice::ExtractedInvoice;
use recon_core::ocr::RawDocument;
use recon_core::service::ExtractionService;

use super::{OutputFormat, build_recognizer, format_extraction, load_config, mime_for};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern of input files
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of documents recognized at once
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue when a file is rejected
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of processing a single file.
struct ProcessResult {
    path: PathBuf,
    extraction: Option<ExtractedInvoice>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;
    config.recognition.max_concurrent = args.jobs.max(1);

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!("{} Found {} files to process", style("ℹ").blue(), files.len());

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let service = Arc::new(ExtractionService::new(build_recognizer(&config), &config));
    let mut handles = Vec::with_capacity(files.len());
    for path in files {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let file_start = Instant::now();
            let outcome = process_single_file(&service, &path).await;
            (path, outcome, file_start.elapsed().as_millis() as u64)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let (path, outcome, processing_time_ms) = handle.await?;
        match outcome {
            Ok(extraction) => results.push(ProcessResult {
                path,
                error: extraction.error.clone(),
                extraction: Some(extraction),
                processing_time_ms,
            }),
            Err(e) => {
                let error_msg = e.to_string();
                if !args.continue_on_error {
                    error!("Failed to process {}: {}", path.display(), error_msg);
                    anyhow::bail!("Processing failed: {}", error_msg);
                }
                warn!("Failed to process {}: {}", path.display(), error_msg);
                results.push(ProcessResult {
                    path,
                    extraction: None,
                    error: Some(error_msg),
                    processing_time_ms,
                });
            }
        }
        overall_pb.inc(1);
    }

    overall_pb.finish_with_message("Complete");

    if let Some(output_dir) = &args.output_dir {
        for result in &results {
            let Some(extraction) = &result.extraction else {
                continue;
            };
            let output_name = result.path.file_stem().and_then(|s| s.to_str()).unwrap_or("invoice");
            let output_path = output_dir.join(format!("{}.{}", output_name, args.format.extension()));
            fs::write(&output_path, format_extraction(extraction, args.format)?)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!("{} Summary written to {}", style("✓").green(), summary_path.display());
    }

    let succeeded = results
        .iter()
        .filter(|r| r.extraction.as_ref().is_some_and(|e| e.success))
        .count();
    let failed: Vec<&ProcessResult> = results.iter().filter(|r| r.error.is_some()).collect();

    println!();
    println!("{} Processed {} files in {:?}", style("✓").green(), results.len(), start.elapsed());
    println!(
        "   {} successful, {} failed",
        style(succeeded).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

async fn process_single_file<R>(
    service: &ExtractionService<R>,
    path: &Path,
) -> anyhow::Result<ExtractedInvoice>
where
    R: recon_core::ocr::Recognizer + 'static,
{
    let document = RawDocument::new(fs::read(path)?, mime_for(path));
    Ok(service.extract(document).await?)
}

fn write_summary(path: &Path, results: &[ProcessResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "invoice_number",
        "invoice_date",
        "provider_name",
        "total",
        "items",
        "confidence",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        let filename = result.path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let time = result.processing_time_ms.to_string();

        match &result.extraction {
            Some(extraction) if extraction.success => {
                let header = &extraction.header;
                wtr.write_record([
                    filename,
                    "success",
                    header.invoice_number.as_deref().unwrap_or(""),
                    &header.invoice_date.map(|d| d.to_string()).unwrap_or_default(),
                    header.provider_name.as_deref().unwrap_or(""),
                    &header.total.map(|d| d.to_string()).unwrap_or_default(),
                    &extraction.items.len().to_string(),
                    &format!("{:.2}", extraction.confidence),
                    &time,
                    "",
                ])?;
            }
            _ => {
                wtr.write_record([
                    filename,
                    "error",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    &time,
                    result.error.as_deref().unwrap_or(""),
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
