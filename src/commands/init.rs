//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Where `init` put things
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub blob_dir: String,
    pub vector_backend: String,
    pub overwritten: bool,
}

/// Write a default config, create the metadata database and the blob directory
pub async fn cmd_init(base_dir: PathBuf, config_path: PathBuf, force: bool) -> Result<InitReport> {
    let existed = config_path.exists();
    if existed && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    MetaDb::connect(&config).await?;
    info!("Created database at {:?}", config.paths.db_file);

    std::fs::create_dir_all(&config.paths.blob_dir)?;

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        blob_dir: config.paths.blob_dir.display().to_string(),
        vector_backend: format!("{:?}", config.vector_backend).to_lowercase(),
        overwritten: existed,
    })
}

pub fn print_init(report: &InitReport) {
    if report.overwritten {
        println!("✓ docchat re-initialized (previous config overwritten)");
    } else {
        println!("✓ docchat initialized successfully");
    }
    println!("  Config: {}", report.config_path);
    println!("  Database: {}", report.db_path);
    println!("  Blobs: {}", report.blob_dir);
    println!("\nNext steps:");
    println!("  1. Point [embedding] and [completion] at your model servers");
    if report.vector_backend == "qdrant" {
        println!("  2. Start Qdrant: docker run -p 6333:6333 -p 6334:6334 qdrant/qdrant");
    }
    println!("  3. Start a chat: docchat create \"Q3 report\" report.pdf");
}
