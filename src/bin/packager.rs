//! Packager CLI
//!
//! Ingests loader directories and JSON files, then writes the archives.
//!
//! Usage:
//!   packager ./content --group acme --artifact catalog --archive-version 1
//!
//! Examples:
//!   # Package a loader tree with settings from a YAML file
//!   packager ./content --config packager.yaml
//!
//!   # Package a JSON array of players as typed nodes, 1000 records per part
//!   packager --json squads.json --type my:player --page-size 1000
//!
//! Settings come from `--config` when given, else from `PACKAGER_*`
//! environment variables. Command-line flags override both.

use anyhow::{Context, Result};
use clap::Parser;
use content_packager::{Packager, PackagerConfig};
use std::path::PathBuf;
use tracing::info;

/// Compile records into content archives
#[derive(Parser, Debug)]
#[command(name = "packager")]
#[command(version = "0.1.0")]
#[command(about = "Compile loader directories and JSON records into content archives")]
struct Args {
    /// Loader directories to ingest (node.json / association.json trees)
    directories: Vec<PathBuf>,

    /// JSON files holding one object or an array of objects to add as nodes
    #[arg(long = "json")]
    json_files: Vec<PathBuf>,

    /// Type forced onto every node read with --json
    #[arg(long = "type")]
    type_qname: Option<String>,

    /// YAML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Output directory for archives
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Archive group
    #[arg(long)]
    group: Option<String>,

    /// Archive artifact name
    #[arg(long)]
    artifact: Option<String>,

    /// Archive version
    #[arg(long)]
    archive_version: Option<String>,

    /// Maximum records per archive part
    #[arg(long)]
    page_size: Option<usize>,

    /// Records to skip before packaging
    #[arg(long)]
    skip: Option<usize>,

    /// Maximum records to package
    #[arg(long)]
    limit: Option<usize>,

    /// Directory to stage page trees in (temporary by default)
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Print the archive summary as JSON
    #[arg(long)]
    json_report: bool,
}

impl Args {
    fn load_config(&self) -> Result<PackagerConfig> {
        let mut config = match &self.config {
            Some(path) => PackagerConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PackagerConfig::from_env().context("Failed to read PACKAGER_* environment")?,
        };

        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(group) = &self.group {
            config.archive_group = group.clone();
        }
        if let Some(artifact) = &self.artifact {
            config.archive_name = artifact.clone();
        }
        if let Some(version) = &self.archive_version {
            config.archive_version = version.clone();
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(skip) = self.skip {
            config.skip = skip;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        if let Some(dir) = &self.working_dir {
            config.working_dir = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    info!(
        output = %config.output_path.display(),
        group = %config.archive_group,
        artifact = %config.archive_name,
        version = %config.archive_version,
        "starting packager"
    );

    let mut packager = Packager::new(config)?;

    for dir in &args.directories {
        packager
            .add_directory(dir)
            .with_context(|| format!("Failed to ingest directory {}", dir.display()))?;
    }
    for file in &args.json_files {
        packager
            .add_from_disk(file, args.type_qname.as_deref())
            .with_context(|| format!("Failed to add records from {}", file.display()))?;
    }

    let archive = packager.package().await.context("Packaging failed")?;

    if args.json_report {
        println!("{}", serde_json::to_string_pretty(&archive)?);
    } else {
        println!("{}", archive.filename.display());
        for part in &archive.parts {
            println!("  {}", part.display());
        }
    }
    Ok(())
}
