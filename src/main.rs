//! mardoc - Moroccan ID card and vehicle registration card reader
//!
//! Reads one photograph and prints the extracted fields as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mardoc::config::{self, AppConfig};
use mardoc::storage;
use mardoc::vision::ModelManager;
use mardoc::{DocumentExtractor, DocumentImage, DocumentType};

/// mardoc - field extraction for Moroccan documents
#[derive(Parser, Debug)]
#[command(name = "mardoc")]
#[command(about = "Extracts bilingual fields from CIN cards and cartes grises")]
struct Args {
    /// Image to read
    #[arg(required_unless_present_any = ["list_types", "download_models"])]
    image: Option<PathBuf>,

    /// Declared document type (cin_old, cin_new, carte_grise_recto, carte_grise_verso)
    #[arg(short = 't', long, value_name = "TYPE")]
    document_type: Option<DocumentType>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Give up after this many seconds (0 disables the limit)
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Write the ID card with its template zones outlined to this PNG
    #[arg(long, value_name = "OUT")]
    debug_zones: Option<PathBuf>,

    /// Pretty-print the JSON response
    #[arg(long)]
    pretty: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List supported document types and exit
    #[arg(long)]
    list_types: bool,

    /// Download the fallback OCR models and exit
    #[arg(long)]
    download_models: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays valid JSON
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.list_types {
        for document in DocumentType::ALL {
            println!("{:<20} {}", document.as_str(), document.display_name());
        }
        return Ok(());
    }

    let config = load_or_create_config(args.config.as_deref())?;

    if args.download_models {
        let manager = ModelManager::from_config(&config.paddle)?;
        manager.ensure_all_models()?;
        for (model, available, size) in manager.get_model_status() {
            println!(
                "{:<22} {:<10} {}",
                model.display_name(),
                if available { "ready" } else { "missing" },
                size.map(|s| format!("{} bytes", s)).unwrap_or_default()
            );
        }
        info!("Models stored in {:?}", manager.models_dir());
        return Ok(());
    }

    let Some(path) = args.image.as_deref() else {
        anyhow::bail!("no image given");
    };
    let image = DocumentImage::open(path, args.document_type)
        .with_context(|| format!("Failed to read image {:?}", path))?;

    let timeout_secs = args.timeout_secs.unwrap_or(config.general.default_timeout_secs);
    let extractor = DocumentExtractor::new(config).context("Failed to initialise extractor")?;

    let response = if timeout_secs == 0 {
        extractor.extract(&image)?
    } else {
        extractor.extract_with_timeout(image.clone(), Duration::from_secs(timeout_secs))?
    };

    if let Some(out) = &args.debug_zones {
        match extractor.render_zones(&image, response.resolved_type)? {
            Some(rendered) => {
                rendered
                    .save(out)
                    .with_context(|| format!("Failed to write {:?}", out))?;
                info!("Zone overlay written to {:?}", out);
            }
            None => warn!("No zone template for {}, skipping --debug-zones", response.resolved_type),
        }
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", json);

    Ok(())
}

/// Load the configuration from `path`, the user config directory, or defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}
