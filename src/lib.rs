//! Record compiler and archive packager.
//!
//! This crate accumulates a graph of mutually referencing records under
//! temporary aliases, links it, assigns permanent identifiers and writes the
//! result as versioned, dependency-aware content archives.
//!
//! # Architecture
//!
//! ```text
//! callers / add_directory ──► RecordStore ──► graph synthesis ──► ReferenceResolver
//!                                                                     │
//!        zip archives ◄── PageWriter + manifests ◄── partition ◄── finisher
//! ```
//!
//! # Key Concepts
//!
//! - **Alias**: temporary key a record carries until resolution
//! - **Relator marker**: `{"__related_node__": "<alias>"}` inside a payload,
//!   pointing at another record
//! - **Container**: synthesized folder node built from `_parentFolderPath` hints
//! - **Page**: bounded slice of the resolved records, written as one archive
//!
//! # Example
//!
//! ```ignore
//! use content_packager::{Packager, PackagerConfig};
//! use serde_json::json;
//!
//! let mut packager = Packager::new(PackagerConfig::default())?;
//! let home = packager.add_node(json!({"title": "Home", "_parentFolderPath": "/docs"}))?;
//! packager.add_attachment(&home, "default", "home.html")?;
//! let archive = packager.package().await?;
//! ```

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod finisher;
pub mod graph;
pub mod ids;
pub mod ingest;
pub mod layout;
pub mod manifest;
pub mod media;
pub mod packager;
pub mod record;
pub mod resolver;
pub mod store;
pub mod walk;

pub use archive::{ArchiveSink, ZipArchiveSink};
pub use config::{ArchiveIdentity, PackagerConfig};
pub use context::RunContext;
pub use error::{PackagerError, Result};
pub use ids::{IdIssuer, RandomIdIssuer};
pub use media::{GuessMediaTypes, MediaTypes};
pub use packager::{ArchiveInfo, PackageStage, Packager};
pub use record::{Binding, Record, RecordKind};
pub use store::RecordStore;

/// Maximum records per archive part.
pub const DEFAULT_PAGE_SIZE: usize = 50_000;
