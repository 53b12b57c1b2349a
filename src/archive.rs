//! Page partitioning, page trees and archive files.
//!
//! A run's records are cut into pages of at most `page_size` records. Each
//! page is written to its own working tree and sealed into one archive. When
//! there is more than one page, a package manifest naming every part is
//! sealed into the unqualified archive.

use crate::config::ArchiveIdentity;
use crate::context::RunContext;
use crate::error::{PackagerError, Result};
use crate::layout::{ArchiveLayout, MANIFEST_FILE};
use crate::manifest::{BranchManifest, PackageManifest};
use crate::store::PageView;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::File;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Split `window` into consecutive ranges of at most `page_size` positions.
///
/// Yields `ceil(len / page_size)` ranges; only the last may be short.
pub fn partition(window: Range<usize>, page_size: usize) -> Vec<Range<usize>> {
    let page_size = page_size.max(1);
    let mut pages = Vec::with_capacity(window.len().div_ceil(page_size));
    let mut start = window.start;
    while start < window.end {
        let end = (start + page_size).min(window.end);
        pages.push(start..end);
        start = end;
    }
    pages
}

/// Delete archives left by an earlier run with the same identity.
///
/// Parts are removed from `part0` upwards until the first gap, then the
/// unqualified archive. Returns how many files were deleted.
pub async fn cleanup_old_archives(output_dir: &Path, identity: &ArchiveIdentity) -> Result<usize> {
    let mut removed = 0;
    let mut part = 0;
    while remove_if_exists(&output_dir.join(identity.part_file_name(part))).await? {
        removed += 1;
        part += 1;
    }
    if remove_if_exists(&output_dir.join(identity.file_name())).await? {
        removed += 1;
    }
    if removed > 0 {
        info!(
            removed,
            group = %identity.group,
            artifact = %identity.artifact,
            "removed old archives"
        );
    }
    Ok(removed)
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PackagerError::io(path, e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PackagerError::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PackagerError::json(path.display().to_string(), e))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PackagerError::io(path, e))
}

/// Writes one page of records into a working tree.
pub struct PageWriter<'a> {
    ctx: &'a RunContext,
    identity: &'a ArchiveIdentity,
}

impl<'a> PageWriter<'a> {
    pub fn new(ctx: &'a RunContext, identity: &'a ArchiveIdentity) -> Self {
        Self { ctx, identity }
    }

    /// Write descriptors, records and attachments under `root`.
    pub async fn write_records(&self, root: &Path, page: &PageView<'_>) -> Result<()> {
        let layout = ArchiveLayout::new(self.ctx);
        info!(root = %root.display(), records = page.len(), "writing page");

        write_json(&root.join(layout.platform_file()), &layout.platform_descriptor()).await?;
        write_json(&root.join(layout.repository_file()), &layout.repository_descriptor()).await?;
        write_json(&root.join(layout.branch_file()), &layout.branch_descriptor()).await?;
        write_json(&root.join(layout.changeset_file()), &layout.changeset_descriptor()).await?;

        let total = page.len();
        for (written, (_, _, record)) in page.iter().enumerate() {
            write_json(&root.join(layout.record_file(record)), &layout.record_json(record)).await?;

            for attachment in &record.attachments {
                let target = root.join(layout.attachment_file(record, attachment));
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PackagerError::io(parent, e))?;
                }
                tokio::fs::copy(&attachment.source, &target)
                    .await
                    .map_err(|e| PackagerError::io(&attachment.source, e))?;
            }

            if written % 1000 == 0 || written + 1 == total {
                info!(written = written + 1, total, "wrote records");
            }
        }

        Ok(())
    }

    /// Write the page's `manifest.json` under `root`.
    pub async fn write_manifest(&self, root: &Path, page: &PageView<'_>) -> Result<()> {
        let manifest = BranchManifest::build(self.ctx, self.identity, page);
        write_json(&root.join(MANIFEST_FILE), &manifest).await?;
        debug!(entries = manifest.contents.len(), "wrote page manifest");
        Ok(())
    }
}

/// Write the package manifest of a multi-part run into `root`.
pub async fn write_package_manifest(
    root: &Path,
    identity: &ArchiveIdentity,
    parts: usize,
) -> Result<()> {
    let manifest = PackageManifest::build(identity, parts);
    write_json(&root.join(MANIFEST_FILE), &manifest).await
}

/// Seals a working tree into a distributable archive file.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Archive everything under `source_dir` into `target`, returning the
    /// path written.
    async fn seal(&self, source_dir: &Path, target: &Path) -> Result<PathBuf>;
}

/// Deflate-compressed zip archives, built on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveSink;

#[async_trait]
impl ArchiveSink for ZipArchiveSink {
    async fn seal(&self, source_dir: &Path, target: &Path) -> Result<PathBuf> {
        let source = source_dir.to_path_buf();
        let output = target.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || zip_directory(&source, &output))
            .await
            .map_err(|e| PackagerError::Task(e.to_string()))??;

        info!(archive = %target.display(), entries, "created archive file");
        Ok(target.to_path_buf())
    }
}

/// Zip a directory tree. Entry names are relative with `/` separators.
fn zip_directory(source: &Path, target: &Path) -> Result<usize> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PackagerError::io(parent, e))?;
    }
    let file = File::create(target).map_err(|e| PackagerError::io(target, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            PackagerError::io(path, e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
        } else {
            writer.start_file(name, options)?;
            let mut input =
                File::open(entry.path()).map_err(|e| PackagerError::io(entry.path(), e))?;
            std::io::copy(&mut input, &mut writer).map_err(|e| PackagerError::io(target, e))?;
            entries += 1;
        }
    }

    writer.finish()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn partition_examples() {
        assert_eq!(partition(0..5, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(partition(0..4, 2), vec![0..2, 2..4]);
        assert_eq!(partition(3..4, 50_000), vec![3..4]);
        assert!(partition(0..0, 10).is_empty());
    }

    proptest! {
        #[test]
        fn partition_covers_window(
            start in 0usize..100,
            len in 0usize..1000,
            page_size in 1usize..64,
        ) {
            let pages = partition(start..start + len, page_size);
            prop_assert_eq!(pages.len(), len.div_ceil(page_size));
            prop_assert_eq!(pages.iter().map(|p| p.len()).sum::<usize>(), len);
            prop_assert!(pages.iter().all(|p| p.len() <= page_size && !p.is_empty()));
            for pair in pages.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert_eq!(pair[0].len(), page_size);
            }
        }
    }

    #[tokio::test]
    async fn cleanup_removes_parts_and_archive() {
        let dir = TempDir::new().unwrap();
        let identity = ArchiveIdentity::new("g", "a", "1");
        for name in [
            identity.part_file_name(0),
            identity.part_file_name(1),
            identity.part_file_name(3),
            identity.file_name(),
            "g-other-1.zip".to_string(),
        ] {
            std::fs::write(dir.path().join(name), b"old").unwrap();
        }

        let removed = cleanup_old_archives(dir.path(), &identity).await.unwrap();

        assert_eq!(removed, 3);
        assert!(!dir.path().join(identity.file_name()).exists());
        // stops at the first missing part
        assert!(dir.path().join(identity.part_file_name(3)).exists());
        assert!(dir.path().join("g-other-1.zip").exists());
    }

    #[tokio::test]
    async fn cleanup_without_old_archives() {
        let dir = TempDir::new().unwrap();
        let identity = ArchiveIdentity::new("g", "a", "1");
        assert_eq!(cleanup_old_archives(dir.path(), &identity).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zip_sink_uses_relative_forward_slash_names() {
        let work = TempDir::new().unwrap();
        let nested = work.path().join("platforms/p");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("platform.json"), b"{}").unwrap();
        std::fs::write(work.path().join("manifest.json"), b"{\"model\":\"2.0.0\"}").unwrap();

        let out = TempDir::new().unwrap();
        let target = out.path().join("archives/g-a-1.zip");
        let written = ZipArchiveSink.seal(work.path(), &target).await.unwrap();
        assert_eq!(written, target);

        let mut archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"platforms/p/platform.json".to_string()));
        assert!(names.contains(&"platforms/".to_string()));

        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert_eq!(manifest, "{\"model\":\"2.0.0\"}");
    }

    #[tokio::test]
    async fn package_manifest_file() {
        let work = TempDir::new().unwrap();
        let identity = ArchiveIdentity::new("g", "a", "1");
        write_package_manifest(work.path(), &identity, 2).await.unwrap();

        let text = std::fs::read_to_string(work.path().join("manifest.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["parts"][1]["artifact"], "a-part1");
    }
}
