//! Storage Layer
//!
//! Application directories and the zone template store.

pub mod templates;

use anyhow::Result;
use std::path::PathBuf;

pub use templates::{TemplateStore, Zone, ZoneLanguage, ZoneTemplate};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("ma", "mardoc", "mardoc")
        .ok_or_else(|| anyhow::anyhow!("Could not determine application directories"))
}

/// Get the application data directory (model cache lives here)
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}
