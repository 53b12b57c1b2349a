//! Records, the unit of the content graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Permanent identifier field. Never allowed on incoming payloads.
pub const DOC_FIELD: &str = "_doc";
/// Requested alias on incoming payloads.
pub const ALIAS_FIELD: &str = "_alias";
pub const TYPE_FIELD: &str = "_type";
pub const QNAME_FIELD: &str = "_qname";
pub const FEATURES_FIELD: &str = "_features";
pub const SYSTEM_FIELD: &str = "_system";
/// Container-path hint set by adapters.
pub const PARENT_FOLDER_FIELD: &str = "_parentFolderPath";
/// Embedded pointer to another record by alias.
pub const RELATED_NODE_MARKER: &str = "__related_node__";

/// Fields that only exist while compiling and never reach the archive.
pub const WORKING_FIELDS: &[&str] = &[
    ALIAS_FIELD,
    PARENT_FOLDER_FIELD,
    "_fileName",
    "_filename",
    "_path",
];

/// Kind of record. Decides the file name a record is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Node,
    Association,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Node => "node",
            RecordKind::Association => "association",
        }
    }

    /// `node.json` or `association.json`
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        match stem {
            "node" => Some(RecordKind::Node),
            "association" => Some(RecordKind::Association),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination container of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub repository_id: String,
    pub branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Binding {
    pub fn new(repository_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            branch_id: branch_id.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A blob queued for copying next to its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub source: PathBuf,
}

/// A typed record in the graph.
///
/// `id` holds the alias until resolution and the permanent identifier
/// afterwards. The original alias is kept in `alias` once resolved.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub binding: Binding,
    pub payload: Map<String, Value>,
    pub attachments: Vec<Attachment>,
    /// Position in the container hierarchy, set by the container pass.
    pub path: Option<String>,
    pub(crate) alias: Option<String>,
}

impl Record {
    pub(crate) fn new(
        id: String,
        kind: RecordKind,
        binding: Binding,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            kind,
            binding,
            payload,
            attachments: Vec::new(),
            path: None,
            alias: None,
        }
    }

    /// Alias the record carried before resolution, if it has been resolved.
    pub fn resolved_alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn type_qname(&self) -> Option<&str> {
        self.str_field(TYPE_FIELD)
    }

    pub fn qname(&self) -> Option<&str> {
        self.str_field(QNAME_FIELD)
    }

    pub fn title(&self) -> Option<String> {
        self.payload.get("title").and_then(scalar_text)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Nested `_features.<feature>` object, created on demand.
    pub fn feature_mut(&mut self, feature: &str) -> &mut Map<String, Value> {
        object_entry(object_entry(&mut self.payload, FEATURES_FIELD), feature)
    }

    pub fn feature(&self, feature: &str) -> Option<&Map<String, Value>> {
        self.payload
            .get(FEATURES_FIELD)
            .and_then(Value::as_object)
            .and_then(|features| features.get(feature))
            .and_then(Value::as_object)
    }
}

/// Text form of a scalar: strings as-is, numbers and booleans printed.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Get `map[key]` as an object, replacing any non-object value.
pub fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    as_object(map.entry(key.to_string()).or_insert(Value::Null))
}

/// `value` as an object; anything else is replaced with an empty one first.
fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    match value {
        Value::Object(object) => object,
        other => {
            *other = Value::Object(Map::new());
            as_object(other)
        }
    }
}
