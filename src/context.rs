//! Per-run constants threaded through every pipeline stage.

use crate::record::Binding;
use chrono::Utc;

/// Identity of the destination platform, repository, branch and changeset
/// for one packaging run.
///
/// Values are fixed when the run starts and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub platform_id: String,
    pub repository_id: String,
    pub branch_id: String,
    pub changeset_rev: String,
    pub changeset_name: String,
}

impl RunContext {
    /// Create a context whose branch and changeset are named after the current time.
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis().to_string();
        Self::with_ids("platformId", "repositoryId", now.clone(), now)
    }

    /// Create a context with explicit identifiers (changeset revision is always `0`).
    pub fn with_ids(
        platform_id: impl Into<String>,
        repository_id: impl Into<String>,
        branch_id: impl Into<String>,
        changeset_name: impl Into<String>,
    ) -> Self {
        Self {
            platform_id: platform_id.into(),
            repository_id: repository_id.into(),
            branch_id: branch_id.into(),
            changeset_rev: "0".to_string(),
            changeset_name: changeset_name.into(),
        }
    }

    /// `<rev>:<name>`
    pub fn changeset_id(&self) -> String {
        format!("{}:{}", self.changeset_rev, self.changeset_name)
    }

    /// Folder name of the changeset on disk, `<rev>_<name>`.
    pub fn changeset_file_name(&self) -> String {
        format!("{}_{}", self.changeset_rev, self.changeset_name)
    }

    /// Binding stamped on every record added during this run.
    pub fn binding(&self) -> Binding {
        Binding::new(&self.repository_id, &self.branch_id)
    }

    /// Locator for a resolved record, used in relator descriptors.
    pub fn node_ref(&self, id: &str) -> String {
        format!(
            "node://{}/{}/{}/{}",
            self.platform_id, self.repository_id, self.branch_id, id
        )
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
