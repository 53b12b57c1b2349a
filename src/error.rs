//! Packager error types.

use std::path::PathBuf;
use thiserror::Error;

/// The result type used throughout the packager.
pub type Result<T> = std::result::Result<T, PackagerError>;

/// Errors that can occur while compiling and packaging records.
///
/// Structural violations describe a broken record graph and are never
/// repaired. Everything else is an external resource failing underneath
/// the pipeline. Both abort the run.
#[derive(Debug, Error)]
pub enum PackagerError {
    /// Incoming payload already carries a permanent identifier.
    #[error("incoming payload cannot have a predefined _doc field (alias hint: {alias})")]
    PredefinedDocField { alias: String },

    /// Two records asked for the same alias.
    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),

    /// Payload is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Lookup target for a mutating operation does not exist.
    #[error("cannot find record for alias: {0}")]
    RecordNotFound(String),

    /// Attachment source is not a readable local file.
    #[error(
        "attachment source {path} for record {record} \
         (attachment {attachment_id}) is not a local file"
    )]
    MissingAttachmentSource {
        record: String,
        attachment_id: String,
        path: PathBuf,
    },

    /// `resolve` was called for an alias the store does not hold.
    #[error("cannot resolve reference for alias: {0}")]
    UnknownAlias(String),

    /// Resolution finished without covering every record.
    #[error("resolved aliases size is {resolved} and it should be {expected}")]
    UnresolvedAliases { resolved: usize, expected: usize },

    /// Node or association without a `_type`.
    #[error("record {id} is missing _type: {payload}")]
    MissingTypeTag { id: String, payload: String },

    /// Two records claim the same hierarchy path.
    #[error(
        "object claims a path \"{path}\" that already exists, \
         object: {second} collides with: {first}"
    )]
    DuplicatePath {
        path: String,
        first: String,
        second: String,
    },

    /// Identifier issuer failed or was unreachable.
    #[error("identifier issuer failed: {0}")]
    IdIssuer(String),

    /// Identifier issuer handed back the wrong number of identifiers.
    #[error("identifier issuer returned {actual} identifiers, expected {expected}")]
    IdCountMismatch { expected: usize, actual: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// `package` was called on a packager that already ran.
    #[error("packager already ran (stage: {0})")]
    AlreadyPackaged(String),

    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse or serialization failure.
    #[error("json error in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// YAML configuration failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Zip stream failure.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

impl PackagerError {
    /// Wrap an io error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackagerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a serde_json error with a short description of what was being read or written.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PackagerError::Json {
            context: context.into(),
            source,
        }
    }

    /// Check if this error describes a broken record graph rather than a failing resource.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PackagerError::PredefinedDocField { .. }
                | PackagerError::DuplicateAlias(_)
                | PackagerError::InvalidPayload(_)
                | PackagerError::RecordNotFound(_)
                | PackagerError::MissingAttachmentSource { .. }
                | PackagerError::UnknownAlias(_)
                | PackagerError::UnresolvedAliases { .. }
                | PackagerError::MissingTypeTag { .. }
                | PackagerError::DuplicatePath { .. }
        )
    }
}
