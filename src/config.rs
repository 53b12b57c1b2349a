//! Packager configuration.

use crate::error::{PackagerError, Result};
use crate::DEFAULT_PAGE_SIZE;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration for a packaging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Directory archives are written to.
    pub output_path: PathBuf,
    /// Archive group.
    pub archive_group: String,
    /// Archive artifact name.
    pub archive_name: String,
    /// Archive version.
    pub archive_version: String,
    /// Maximum records per archive part.
    pub page_size: usize,
    /// Records to skip from the start of the store.
    pub skip: usize,
    /// Maximum records to package; unbounded when absent.
    pub limit: Option<usize>,
    /// Where page trees are staged. A fresh temporary directory when absent.
    pub working_dir: Option<PathBuf>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("./archives"),
            archive_group: "packager".to_string(),
            archive_name: "import".to_string(),
            archive_version: Utc::now().timestamp_millis().to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            skip: 0,
            limit: None,
            working_dir: None,
        }
    }
}

impl PackagerConfig {
    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading packager configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| PackagerError::io(path, e))?;
        let config: PackagerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PACKAGER_OUTPUT_PATH`, `PACKAGER_GROUP`,
    /// `PACKAGER_ARTIFACT`, `PACKAGER_VERSION` and `PACKAGER_PAGE_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("PACKAGER_OUTPUT_PATH") {
            config.output_path = PathBuf::from(path);
        }
        if let Some(group) = lookup("PACKAGER_GROUP") {
            config.archive_group = group;
        }
        if let Some(artifact) = lookup("PACKAGER_ARTIFACT") {
            config.archive_name = artifact;
        }
        if let Some(version) = lookup("PACKAGER_VERSION") {
            config.archive_version = version;
        }
        if let Some(page_size) = lookup("PACKAGER_PAGE_SIZE") {
            config.page_size = page_size.trim().parse().map_err(|_| {
                PackagerError::InvalidConfig(format!(
                    "PACKAGER_PAGE_SIZE is not a number: {}",
                    page_size
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(PackagerError::InvalidConfig("page_size must be at least 1".into()));
        }
        for (field, value) in [
            ("archive_group", &self.archive_group),
            ("archive_name", &self.archive_name),
            ("archive_version", &self.archive_version),
        ] {
            if value.trim().is_empty() {
                return Err(PackagerError::InvalidConfig(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> ArchiveIdentity {
        ArchiveIdentity::new(&self.archive_group, &self.archive_name, &self.archive_version)
    }
}

/// Group, artifact and version naming an archive. Always lower case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIdentity {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl ArchiveIdentity {
    pub fn new(group: &str, artifact: &str, version: &str) -> Self {
        Self {
            group: group.to_lowercase(),
            artifact: artifact.to_lowercase(),
            version: version.to_lowercase(),
        }
    }

    /// `<group>-<artifact>-<version>.zip`
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.zip", self.group, self.artifact, self.version)
    }

    /// Artifact name of a part in a multi-part package.
    pub fn part_artifact(&self, part: usize) -> String {
        format!("{}-part{}", self.artifact, part)
    }

    /// `<group>-<artifact>-part<N>-<version>.zip`
    pub fn part_file_name(&self, part: usize) -> String {
        format!("{}-{}-{}.zip", self.group, self.part_artifact(part), self.version)
    }
}
