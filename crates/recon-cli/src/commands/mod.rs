//! CLI subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod extract;
pub mod parse;
pub mod reconcile;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use recon_core::models::config::ReconConfig;
use recon_core::models::invoice::ExtractedInvoice;
use recon_core::ocr::DocumentRecognizer;
use recon_core::store::{MemoryStore, StoreSnapshot};

use crate::engine::Engine;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Load the config file given on the command line, else the default one if
/// it exists, else defaults. `RECON_*` variables override either.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<ReconConfig> {
    let config = match config_path {
        Some(path) => ReconConfig::from_file(Path::new(path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                ReconConfig::from_file(&default_path)?
            } else {
                ReconConfig::default()
            }
        }
    };
    Ok(config.with_env_overrides())
}

/// MIME type declared for a file, from its extension.
pub fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Recognizer over the OCR models named in the config.
///
/// Missing models only fail documents that actually need OCR.
pub fn build_recognizer(config: &ReconConfig) -> DocumentRecognizer<Engine> {
    DocumentRecognizer::from_config(Engine::load(config), config)
}

/// Open the state file, or an empty store when it does not exist yet.
pub fn load_store(path: &Path) -> anyhow::Result<MemoryStore> {
    if !path.exists() {
        debug!("State file {} not found, starting empty", path.display());
        return Ok(MemoryStore::new());
    }
    let content = fs::read_to_string(path)?;
    let snapshot: StoreSnapshot = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid state file {}: {}", path.display(), e))?;
    Ok(MemoryStore::from_snapshot(snapshot))
}

/// Exclusive hold on a state file for a read-modify-write cycle.
///
/// The lock is taken on a `.lock` file next to the state file, because the
/// state file itself is replaced on save. It is released on drop.
pub struct StateLock {
    path: PathBuf,
    _lock: File,
}

impl StateLock {
    pub async fn acquire(path: &Path) -> anyhow::Result<Self> {
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| anyhow::anyhow!("Cannot open lock file {}: {}", lock_path.display(), e))?;

        let file = tokio::task::spawn_blocking(move || file.lock().map(|_| file)).await??;
        debug!("Locked {}", lock_path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _lock: file,
        })
    }

    pub fn load(&self) -> anyhow::Result<MemoryStore> {
        load_store(&self.path)
    }

    /// Replace the state file with the store's committed state. Readers see
    /// either the old file or the new one, never a partial write.
    pub async fn save(&self, store: &MemoryStore) -> anyhow::Result<()> {
        let snapshot = store.snapshot().await?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(&snapshot)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| anyhow::anyhow!("Cannot write state file {}: {}", self.path.display(), e))?;
        Ok(())
    }
}

pub fn format_extraction(result: &ExtractedInvoice, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => format_csv(result),
        OutputFormat::Text => Ok(format_text(result)),
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn format_csv(result: &ExtractedInvoice) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["product_name", "quantity", "unit_price", "total_price"])?;
    for item in &result.items {
        wtr.write_record([
            item.product_name.clone(),
            opt(&item.quantity),
            opt(&item.unit_price),
            opt(&item.total_price),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(result: &ExtractedInvoice) -> String {
    let header = &result.header;
    let missing = || "-".to_string();
    let mut output = String::new();

    if !result.success {
        output.push_str(&format!(
            "Extraction failed: {}\n",
            result.error.as_deref().unwrap_or("unknown error")
        ));
        return output;
    }

    output.push_str(&format!("Invoice:  {}\n", header.invoice_number.clone().unwrap_or_else(missing)));
    output.push_str(&format!("Date:     {}\n", header.invoice_date.map(|d| d.to_string()).unwrap_or_else(missing)));
    output.push_str(&format!("Provider: {}\n", header.provider_name.clone().unwrap_or_else(missing)));
    output.push('\n');

    output.push_str("Items:\n");
    for item in &result.items {
        output.push_str(&format!(
            "  {:<40} {:>8} x {:>10} = {:>10}\n",
            item.product_name,
            opt(&item.quantity),
            opt(&item.unit_price),
            opt(&item.total_price)
        ));
    }
    output.push('\n');

    output.push_str("Summary:\n");
    output.push_str(&format!("  Subtotal: {}\n", header.subtotal.map(|d| d.to_string()).unwrap_or_else(missing)));
    output.push_str(&format!("  Tax:      {}\n", header.tax.map(|d| d.to_string()).unwrap_or_else(missing)));
    output.push_str(&format!("  Total:    {}\n", header.total.map(|d| d.to_string()).unwrap_or_else(missing)));
    output.push_str(&format!("\nConfidence: {:.0}%\n", result.confidence * 100.0));

    if !result.suggestions.is_empty() {
        output.push_str("\nSuggestions:\n");
        for s in &result.suggestions {
            output.push_str(&format!("  {:?} #{} {} (from \"{}\")\n", s.kind, s.id, s.name, s.matched_text));
        }
    }

    output
}
