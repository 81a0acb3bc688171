//! Parse command - extract invoice data from recognized text.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use clap::Args;

use recon_core::invoice::{InvoiceParser, RuleInvoiceParser};
use recon_core::models::catalog::TenantId;
use recon_core::resolve::EntityResolver;

use super::{OutputFormat, format_extraction, load_config, load_store};

/// Arguments for the parse command.
#[derive(Args)]
pub struct ParseArgs {
    /// Text file, or "-" for stdin
    #[arg(required = true)]
    input: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// State file whose catalog is used for suggestions
    #[arg(long)]
    state: Option<PathBuf>,

    /// Tenant whose products are suggested
    #[arg(short, long, default_value = "1")]
    tenant: i64,
}

pub async fn run(args: ParseArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let text = if args.input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(&args.input)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", args.input.display(), e))?
    };

    let mut result = RuleInvoiceParser::from_config(&config.extraction).parse(&text);

    if let Some(state) = &args.state {
        if result.success {
            let catalog = load_store(state)?.catalog()?;
            result.suggestions =
                EntityResolver::new(config.resolver.clone()).suggest(&catalog, TenantId(args.tenant), &result);
        }
    }

    println!("{}", format_extraction(&result, args.format)?);
    Ok(())
}
