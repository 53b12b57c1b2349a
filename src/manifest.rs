//! Archive manifests.
//!
//! Every page carries a branch manifest describing the platform, repository,
//! branch, changeset and each record it contains as a dependency graph.
//! Multi-part runs add one package manifest listing the parts.

use crate::config::ArchiveIdentity;
use crate::context::RunContext;
use crate::layout::ArchiveLayout;
use crate::store::PageView;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Manifest model version understood by the importing repository.
pub const MANIFEST_MODEL: &str = "2.0.0";

/// Pointer from one manifest entry to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRef {
    pub type_id: String,
    pub id: String,
    pub key: String,
}

impl ManifestRef {
    fn new(type_id: &str, id: &str, key: String) -> Self {
        Self {
            type_id: type_id.to_string(),
            id: id.to_string(),
            key,
        }
    }
}

/// One entry in `contents` or `sources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub type_id: String,
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub requires: Vec<ManifestRef>,
    pub required_by: Vec<ManifestRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<ManifestRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "_qname", default, skip_serializing_if = "Option::is_none")]
    pub qname: Option<Value>,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub type_qname: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ManifestEntry {
    fn source(reference: ManifestRef) -> Self {
        Self {
            type_id: reference.type_id,
            id: reference.id,
            key: reference.key,
            location: None,
            requires: Vec::new(),
            required_by: Vec::new(),
            dependencies: None,
            title: None,
            qname: None,
            type_qname: None,
            path: None,
        }
    }

    fn datastore(
        reference: ManifestRef,
        location: String,
        requires: Vec<ManifestRef>,
        required_by: Vec<ManifestRef>,
    ) -> Self {
        Self {
            location: Some(location),
            dependencies: Some(requires.clone()),
            requires,
            required_by,
            ..Self::source(reference)
        }
    }
}

/// Manifest of one archive page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchManifest {
    pub model: String,
    pub group: String,
    pub artifact: String,
    pub version: String,
    #[serde(rename = "type")]
    pub manifest_type: String,
    pub includes: Vec<Value>,
    pub tip_changeset_only: bool,
    pub sources: Vec<Vec<ManifestEntry>>,
    pub contents: BTreeMap<String, ManifestEntry>,
}

impl BranchManifest {
    /// Describe a page of resolved, finished records.
    pub fn build(ctx: &RunContext, identity: &ArchiveIdentity, page: &PageView<'_>) -> Self {
        let layout = ArchiveLayout::new(ctx);
        let changeset_id = ctx.changeset_id();

        let platform = ManifestRef::new(
            "platform",
            &ctx.platform_id,
            format!("platform_{}", ctx.platform_id),
        );
        let repository = ManifestRef::new(
            "repository",
            &ctx.repository_id,
            format!("repository_{}", ctx.repository_id),
        );
        let branch =
            ManifestRef::new("branch", &ctx.branch_id, format!("branch_{}", ctx.branch_id));
        let changeset = ManifestRef::new(
            "changeset",
            &changeset_id,
            format!("changeset_{}", changeset_id),
        );

        let records: Vec<ManifestRef> = page
            .iter()
            .map(|(_, id, record)| {
                ManifestRef::new(record.kind.as_str(), id, format!("{}_{}", changeset_id, id))
            })
            .collect();

        let mut contents = BTreeMap::new();
        for entry in [
            ManifestEntry::datastore(
                platform.clone(),
                layout.platform_dir(),
                vec![repository.clone()],
                Vec::new(),
            ),
            ManifestEntry::datastore(
                repository.clone(),
                layout.repository_dir(),
                vec![branch.clone()],
                vec![platform.clone()],
            ),
            ManifestEntry::datastore(
                branch.clone(),
                layout.branch_dir(),
                vec![changeset.clone()],
                vec![repository.clone()],
            ),
            ManifestEntry::datastore(
                changeset.clone(),
                layout.changeset_dir(),
                records.clone(),
                vec![branch.clone()],
            ),
        ] {
            contents.insert(entry.key.clone(), entry);
        }

        for ((_, id, record), reference) in page.iter().zip(records) {
            let entry = ManifestEntry {
                location: Some(layout.record_location(id)),
                requires: Vec::new(),
                required_by: vec![changeset.clone()],
                dependencies: Some(Vec::new()),
                title: Some(record.title().unwrap_or_else(|| id.to_string())),
                qname: record.payload.get("_qname").cloned(),
                type_qname: record.payload.get("_type").cloned(),
                path: record.path.clone(),
                ..ManifestEntry::source(reference)
            };
            contents.insert(entry.key.clone(), entry);
        }

        Self {
            model: MANIFEST_MODEL.to_string(),
            group: identity.group.clone(),
            artifact: identity.artifact.clone(),
            version: identity.version.clone(),
            manifest_type: "branch".to_string(),
            includes: Vec::new(),
            tip_changeset_only: true,
            sources: vec![vec![
                ManifestEntry::source(platform),
                ManifestEntry::source(repository),
                ManifestEntry::source(branch),
            ]],
            contents,
        }
    }
}

/// Part of a multi-part package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRef {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

/// Top-level manifest tying the parts of a multi-part run together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub model: String,
    pub group: String,
    pub artifact: String,
    pub version: String,
    #[serde(rename = "type")]
    pub manifest_type: String,
    pub includes: Vec<Value>,
    pub parts: Vec<PartRef>,
}

impl PackageManifest {
    pub fn build(identity: &ArchiveIdentity, parts: usize) -> Self {
        Self {
            model: MANIFEST_MODEL.to_string(),
            group: identity.group.clone(),
            artifact: identity.artifact.clone(),
            version: identity.version.clone(),
            manifest_type: "package".to_string(),
            includes: Vec::new(),
            parts: (0..parts)
                .map(|i| PartRef {
                    group: identity.group.clone(),
                    artifact: identity.part_artifact(i),
                    version: identity.version.clone(),
                })
                .collect(),
        }
    }
}
