//! The packager facade.
//!
//! Collects records from callers and adapters, then runs the packaging
//! pipeline exactly once:
//!
//! ```text
//! Idle → Synthesizing → Resolving → Finishing → Verifying → Partitioning
//!      → Writing(i of N) → Manifesting → Zipping(i of N) → Done
//! ```
//!
//! Any failing stage moves the packager to `Failed` and surfaces the error.

use crate::archive::{
    cleanup_old_archives, partition, write_package_manifest, ArchiveSink, PageWriter,
    ZipArchiveSink,
};
use crate::config::{ArchiveIdentity, PackagerConfig};
use crate::context::RunContext;
use crate::error::{PackagerError, Result};
use crate::finisher::{bind_attachments, cleanup, verify_paths};
use crate::graph::{
    add_record, link, synthesize_containers, synthesize_relators, LINKED_ASSOCIATION,
};
use crate::ids::{IdIssuer, RandomIdIssuer};
use crate::media::{GuessMediaTypes, MediaTypes};
use crate::record::{Record, RecordKind, QNAME_FIELD, TYPE_FIELD};
use crate::resolver::ReferenceResolver;
use crate::store::RecordStore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Default type of nodes added without one.
pub const DEFAULT_NODE_TYPE: &str = "n:node";

/// Where a packager is in its single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageStage {
    Idle,
    Synthesizing,
    Resolving,
    Finishing,
    Verifying,
    Partitioning,
    Writing { page: usize, of: usize },
    Manifesting,
    Zipping { page: usize, of: usize },
    Done,
    Failed(String),
}

impl fmt::Display for PackageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStage::Idle => f.write_str("idle"),
            PackageStage::Synthesizing => f.write_str("synthesizing"),
            PackageStage::Resolving => f.write_str("resolving"),
            PackageStage::Finishing => f.write_str("finishing"),
            PackageStage::Verifying => f.write_str("verifying"),
            PackageStage::Partitioning => f.write_str("partitioning"),
            PackageStage::Writing { page, of } => write!(f, "writing page {} of {}", page + 1, of),
            PackageStage::Manifesting => f.write_str("manifesting"),
            PackageStage::Zipping { page, of } => write!(f, "zipping page {} of {}", page + 1, of),
            PackageStage::Done => f.write_str("done"),
            PackageStage::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

fn advance(stage: &mut PackageStage, next: PackageStage) {
    info!(stage = %next, "packaging stage");
    *stage = next;
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    pub group: String,
    pub artifact: String,
    pub version: String,
    /// The archive to import. For multi-part runs this holds the package manifest.
    pub filename: PathBuf,
    /// Part archives, in order. Empty for single-part runs.
    pub parts: Vec<PathBuf>,
    /// Records written across all parts.
    pub records: usize,
}

/// Compiles records into archives.
pub struct Packager {
    config: PackagerConfig,
    ctx: RunContext,
    store: RecordStore,
    root: String,
    issuer: Box<dyn IdIssuer>,
    media: Box<dyn MediaTypes>,
    sink: Box<dyn ArchiveSink>,
    stage: PackageStage,
}

impl Packager {
    /// Create a packager with a fresh run context. The root record is added
    /// immediately.
    pub fn new(config: PackagerConfig) -> Result<Self> {
        Self::with_context(config, RunContext::new())
    }

    pub fn with_context(config: PackagerConfig, ctx: RunContext) -> Result<Self> {
        config.validate()?;

        let mut store = RecordStore::new();
        let mut root = Map::new();
        root.insert(QNAME_FIELD.into(), Value::String("r:root".into()));
        root.insert(TYPE_FIELD.into(), Value::String("n:root".into()));
        let root = store
            .add(RecordKind::Node, ctx.binding().with_path("/"), root, &[])?
            .id
            .clone();

        Ok(Self {
            config,
            ctx,
            store,
            root,
            issuer: Box::new(RandomIdIssuer::new()),
            media: Box::new(GuessMediaTypes),
            sink: Box::new(ZipArchiveSink),
            stage: PackageStage::Idle,
        })
    }

    pub fn with_issuer(mut self, issuer: impl IdIssuer + 'static) -> Self {
        self.issuer = Box::new(issuer);
        self
    }

    pub fn with_media_types(mut self, media: impl MediaTypes + 'static) -> Self {
        self.media = Box::new(media);
        self
    }

    pub fn with_sink(mut self, sink: impl ArchiveSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Key of the root record.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn stage(&self) -> &PackageStage {
        &self.stage
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.store.get(key)
    }

    /// Add a node. `_type` defaults to `n:node`. Returns the node's alias.
    pub fn add_node(&mut self, payload: Value) -> Result<String> {
        self.add_node_with_keys(into_object(payload)?, &[])
    }

    pub(crate) fn add_node_with_keys(
        &mut self,
        mut payload: Map<String, Value>,
        alternate_keys: &[String],
    ) -> Result<String> {
        if !payload.contains_key(TYPE_FIELD) {
            payload.insert(TYPE_FIELD.into(), Value::String(DEFAULT_NODE_TYPE.into()));
        }
        add_record(&mut self.store, &self.ctx, RecordKind::Node, payload, alternate_keys)
    }

    /// Add an association between two existing records. `_type` defaults to
    /// `a:linked`. Returns the association's alias.
    pub fn add_association(
        &mut self,
        source: &str,
        target: &str,
        payload: Value,
        alternate_key: Option<&str>,
    ) -> Result<String> {
        let keys: Vec<String> = alternate_key.into_iter().map(str::to_string).collect();
        self.add_association_with_keys(source, target, into_object(payload)?, &keys)
    }

    pub(crate) fn add_association_with_keys(
        &mut self,
        source: &str,
        target: &str,
        payload: Map<String, Value>,
        alternate_keys: &[String],
    ) -> Result<String> {
        link(
            &mut self.store,
            &self.ctx,
            source,
            target,
            payload,
            LINKED_ASSOCIATION,
            alternate_keys,
        )
    }

    /// Add a record of either kind, as read from a `node.json` or
    /// `association.json` file. Associations keep whatever endpoints they carry.
    pub(crate) fn add_record_with_keys(
        &mut self,
        kind: RecordKind,
        payload: Map<String, Value>,
        alternate_keys: &[String],
    ) -> Result<String> {
        match kind {
            RecordKind::Node => self.add_node_with_keys(payload, alternate_keys),
            RecordKind::Association => {
                add_record(&mut self.store, &self.ctx, kind, payload, alternate_keys)
            }
        }
    }

    /// Queue a local file as an attachment of `target`.
    pub fn add_attachment(
        &mut self,
        target: &str,
        attachment_id: &str,
        source: impl AsRef<Path>,
    ) -> Result<()> {
        self.store.add_attachment(target, attachment_id, source.as_ref())?;
        Ok(())
    }

    pub(crate) fn record_mut(&mut self, key: &str) -> Option<&mut Record> {
        self.store.get_mut(key)
    }

    /// Add every object in a JSON file as a node.
    ///
    /// The file holds one object or an array of objects. When `type_qname`
    /// is given it overrides each object's `_type`.
    pub fn add_from_disk(
        &mut self,
        file: impl AsRef<Path>,
        type_qname: Option<&str>,
    ) -> Result<Vec<String>> {
        let file = file.as_ref();
        let text = std::fs::read_to_string(file).map_err(|e| PackagerError::io(file, e))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| PackagerError::json(file.display().to_string(), e))?;

        let objects = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut added = Vec::with_capacity(objects.len());
        for object in objects {
            let mut payload = into_object(object)?;
            if let Some(type_qname) = type_qname {
                payload.insert(TYPE_FIELD.into(), Value::String(type_qname.to_string()));
            }
            added.push(self.add_node_with_keys(payload, &[])?);
        }
        info!(file = %file.display(), added = added.len(), "added records from disk");
        Ok(added)
    }

    /// Every record whose `_type` is `qname`.
    pub fn nodes_with_type(&self, qname: &str) -> Vec<&Record> {
        self.store
            .iter()
            .filter(|record| record.type_qname() == Some(qname))
            .collect()
    }

    /// Run the pipeline and write the archives. Runs at most once.
    pub async fn package(&mut self) -> Result<ArchiveInfo> {
        if self.stage != PackageStage::Idle {
            return Err(PackagerError::AlreadyPackaged(self.stage.to_string()));
        }

        match self.run().await {
            Ok(info) => {
                advance(&mut self.stage, PackageStage::Done);
                info!(
                    archive = %info.filename.display(),
                    parts = info.parts.len(),
                    records = info.records,
                    "packaging complete"
                );
                Ok(info)
            }
            Err(err) => {
                advance(&mut self.stage, PackageStage::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<ArchiveInfo> {
        advance(&mut self.stage, PackageStage::Synthesizing);
        synthesize_relators(&mut self.store, &self.ctx)?;
        synthesize_containers(&mut self.store, &self.ctx, &self.root)?;

        advance(&mut self.stage, PackageStage::Resolving);
        ReferenceResolver::new(&self.ctx, self.issuer.as_ref())
            .resolve(&mut self.store)
            .await?;

        advance(&mut self.stage, PackageStage::Finishing);
        bind_attachments(&mut self.store, self.media.as_ref()).await?;
        cleanup(&mut self.store)?;

        advance(&mut self.stage, PackageStage::Verifying);
        verify_paths(&self.store)?;

        advance(&mut self.stage, PackageStage::Partitioning);
        let identity = self.config.identity();
        let window = self.store.page(self.config.skip, self.config.limit).range();
        let mut pages = partition(window.clone(), self.config.page_size);
        if pages.is_empty() {
            // nothing in the window still yields one (empty) archive
            pages.push(window);
        }
        let multipart = pages.len() > 1;
        info!(pages = pages.len(), page_size = self.config.page_size, "partitioned records");

        cleanup_old_archives(&self.config.output_path, &identity).await?;

        let scratch = match &self.config.working_dir {
            Some(_) => None,
            None => Some(TempDir::new().map_err(|e| PackagerError::io(std::env::temp_dir(), e))?),
        };
        let work_root = match (&self.config.working_dir, &scratch) {
            (Some(dir), _) => dir.clone(),
            (None, Some(scratch)) => scratch.path().to_path_buf(),
            (None, None) => std::env::temp_dir(),
        };
        let page_dirs: Vec<PathBuf> = (0..pages.len())
            .map(|i| {
                if multipart {
                    work_root.join(format!("package-{}", i))
                } else {
                    work_root.join("package")
                }
            })
            .collect();

        let writer = PageWriter::new(&self.ctx, &identity);
        for (i, (range, dir)) in pages.iter().zip(&page_dirs).enumerate() {
            advance(&mut self.stage, PackageStage::Writing { page: i, of: pages.len() });
            reset_dir(dir).await?;
            writer
                .write_records(dir, &self.store.page(range.start, Some(range.len())))
                .await?;
        }

        advance(&mut self.stage, PackageStage::Manifesting);
        for (range, dir) in pages.iter().zip(&page_dirs) {
            writer
                .write_manifest(dir, &self.store.page(range.start, Some(range.len())))
                .await?;
        }
        let package_dir = work_root.join("package");
        if multipart {
            reset_dir(&package_dir).await?;
            write_package_manifest(&package_dir, &identity, pages.len()).await?;
        }

        let mut parts = Vec::new();
        for (i, dir) in page_dirs.iter().enumerate() {
            advance(&mut self.stage, PackageStage::Zipping { page: i, of: pages.len() });
            if multipart {
                let target = self.config.output_path.join(identity.part_file_name(i));
                parts.push(self.sink.seal(dir, &target).await?);
            }
        }
        let filename = self
            .sink
            .seal(&package_dir, &self.config.output_path.join(identity.file_name()))
            .await?;

        Ok(self.archive_info(identity, filename, parts, &pages))
    }

    fn archive_info(
        &self,
        identity: ArchiveIdentity,
        filename: PathBuf,
        parts: Vec<PathBuf>,
        pages: &[Range<usize>],
    ) -> ArchiveInfo {
        ArchiveInfo {
            group: identity.group,
            artifact: identity.artifact,
            version: identity.version,
            filename,
            parts,
            records: pages.iter().map(Range::len).sum(),
        }
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PackagerError::InvalidPayload(format!(
            "expected a JSON object, got: {}",
            other
        ))),
    }
}

async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PackagerError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PackagerError::io(dir, e))
}
