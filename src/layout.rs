//! On-disk layout of an archive page.
//!
//! ```text
//! manifest.json
//! platforms/<platform>/platform.json
//! platforms/<platform>/repositories/<repo>/repository.json
//! platforms/<platform>/repositories/<repo>/branches/<branch>/branch.json
//! platforms/<platform>/repositories/<repo>/changesets/<rev>_<name>/changeset.json
//! <changeset dir>/nodes/<id>/node.json
//! <changeset dir>/nodes/<id>/attachments/<attachment>.<ext>
//! ```
//!
//! All paths here are relative to the page root and use `/` separators.

use crate::context::RunContext;
use crate::record::{object_entry, Attachment, Record, DOC_FIELD, QNAME_FIELD, SYSTEM_FIELD};
use serde::Serialize;
use serde_json::{Map, Value};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Path builder for one run.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLayout<'a> {
    ctx: &'a RunContext,
}

impl<'a> ArchiveLayout<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    pub fn platform_dir(&self) -> String {
        format!("platforms/{}", self.ctx.platform_id)
    }

    pub fn repository_dir(&self) -> String {
        self.repository_dir_for(&self.ctx.repository_id)
    }

    fn repository_dir_for(&self, repository_id: &str) -> String {
        format!("{}/repositories/{}", self.platform_dir(), repository_id)
    }

    pub fn branch_dir(&self) -> String {
        format!("{}/branches/{}", self.repository_dir(), self.ctx.branch_id)
    }

    pub fn changeset_dir(&self) -> String {
        format!(
            "{}/changesets/{}",
            self.repository_dir(),
            self.ctx.changeset_file_name()
        )
    }

    /// Folder holding a record and its attachments, under the repository the
    /// record is bound to.
    pub fn record_dir(&self, record: &Record) -> String {
        format!(
            "{}/changesets/{}/nodes/{}",
            self.repository_dir_for(&record.binding.repository_id),
            self.ctx.changeset_file_name(),
            record.id
        )
    }

    /// Manifest location of a record, under the run's repository.
    pub fn record_location(&self, id: &str) -> String {
        format!("{}/nodes/{}", self.changeset_dir(), id)
    }

    /// `.../nodes/<id>/node.json` or `.../nodes/<id>/association.json`
    pub fn record_file(&self, record: &Record) -> String {
        format!("{}/{}", self.record_dir(record), record.kind.file_name())
    }

    /// Attachment copy named by attachment id, keeping the source extension.
    pub fn attachment_file(&self, record: &Record, attachment: &Attachment) -> String {
        let extension = attachment
            .source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        format!(
            "{}/attachments/{}{}",
            self.record_dir(record),
            attachment.id,
            extension
        )
    }

    pub fn platform_file(&self) -> String {
        format!("{}/platform.json", self.platform_dir())
    }

    pub fn repository_file(&self) -> String {
        format!("{}/repository.json", self.repository_dir())
    }

    pub fn branch_file(&self) -> String {
        format!("{}/branch.json", self.branch_dir())
    }

    pub fn changeset_file(&self) -> String {
        format!("{}/changeset.json", self.changeset_dir())
    }

    pub fn platform_descriptor(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            datastore_id: self.ctx.platform_id.clone(),
            datastore_type_id: "platform",
            doc: self.ctx.platform_id.clone(),
        }
    }

    pub fn repository_descriptor(&self) -> RepositoryDescriptor {
        RepositoryDescriptor {
            platform_id: self.ctx.platform_id.clone(),
            datastore_id: self.ctx.repository_id.clone(),
            datastore_type_id: "repository",
            doc: self.ctx.repository_id.clone(),
        }
    }

    pub fn branch_descriptor(&self) -> BranchDescriptor {
        BranchDescriptor {
            doc: self.ctx.branch_id.clone(),
            root: "0:root",
            tip: self.ctx.changeset_id(),
            branch_type: "CUSTOM",
        }
    }

    pub fn changeset_descriptor(&self) -> ChangesetDescriptor {
        ChangesetDescriptor {
            doc: self.ctx.changeset_id(),
            revision: self.ctx.changeset_rev.clone(),
            branch: self.ctx.branch_id.clone(),
        }
    }

    /// Payload as written: `_doc` synced, `_qname` ensured, changeset stamped.
    pub fn record_json(&self, record: &Record) -> Map<String, Value> {
        let mut json = record.payload.clone();
        json.insert(DOC_FIELD.into(), Value::String(record.id.clone()));

        let has_qname = json
            .get(QNAME_FIELD)
            .and_then(Value::as_str)
            .is_some_and(|qname| !qname.is_empty());
        if !has_qname {
            json.insert(QNAME_FIELD.into(), Value::String(format!("o:{}", record.id)));
        }

        object_entry(&mut json, SYSTEM_FIELD)
            .insert("changeset".into(), Value::String(self.ctx.changeset_id()));
        json
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    pub datastore_id: String,
    pub datastore_type_id: &'static str,
    #[serde(rename = "_doc")]
    pub doc: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    pub platform_id: String,
    pub datastore_id: String,
    pub datastore_type_id: &'static str,
    #[serde(rename = "_doc")]
    pub doc: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchDescriptor {
    #[serde(rename = "_doc")]
    pub doc: String,
    pub root: &'static str,
    pub tip: String,
    #[serde(rename = "type")]
    pub branch_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangesetDescriptor {
    #[serde(rename = "_doc")]
    pub doc: String,
    pub revision: String,
    pub branch: String,
}
