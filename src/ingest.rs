//! Directory ingestion.
//!
//! Reads a loader tree and feeds it through the packager:
//!
//! ```text
//! <any>/node.json | association.json      record, keyed by its relative path
//! <any>/attachments/<id>.<ext>            attachment of that record
//! <any>/forms/<form-key>.json             n:form node + a:has_form
//! <any>/translations/<locale>/translation.json
//!                                          translation node + a:has_translation
//! <any>/translations/<locale>/attachments/ attachments of the translation
//! ```

use crate::error::{PackagerError, Result};
use crate::packager::Packager;
use crate::record::{object_entry, RecordKind, FEATURES_FIELD, TYPE_FIELD};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const FORM_ENGINE: &str = "alpaca1";
const TRANSLATION_EDITION: &str = "1.0";

impl Packager {
    /// Ingest every record file under `dir`, in sorted path order.
    ///
    /// Returns the number of records added, synthesized forms and
    /// translations included.
    pub fn add_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let before = self.store().count();

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_error(dir, e))?;
            if entry.file_type().is_file() && record_kind(entry.path()).is_some() {
                files.push(entry.into_path());
            }
        }

        for file in &files {
            self.ingest_record_file(dir, file)?;
        }

        let added = self.store().count() - before;
        info!(dir = %dir.display(), files = files.len(), added, "ingested directory");
        Ok(added)
    }

    fn ingest_record_file(&mut self, root: &Path, file: &Path) -> Result<()> {
        let Some(kind) = record_kind(file) else {
            return Ok(());
        };
        let payload = read_object(file)?;
        let record = self.add_record_with_keys(kind, payload, &[relative_key(root, file)])?;
        debug!(file = %file.display(), record = %record, "added {}", kind);

        let Some(folder) = file.parent() else {
            return Ok(());
        };
        self.ingest_attachments(&record, &folder.join("attachments"))?;
        self.ingest_forms(root, &record, &folder.join("forms"))?;
        self.ingest_translations(root, &record, &folder.join("translations"))?;
        Ok(())
    }

    fn ingest_attachments(&mut self, record: &str, folder: &Path) -> Result<()> {
        for path in sorted_entries(folder)? {
            if !path.is_file() {
                continue;
            }
            self.add_attachment(record, &file_stem(&path), &path)?;
        }
        Ok(())
    }

    fn ingest_forms(&mut self, root: &Path, record: &str, folder: &Path) -> Result<()> {
        for path in sorted_entries(folder)? {
            if !path.is_file() {
                continue;
            }
            let mut form = read_object(&path)?;
            form.insert("engineId".into(), json!(FORM_ENGINE));
            form.insert(TYPE_FIELD.into(), json!("n:form"));
            let form = self.add_node_with_keys(form, &[])?;

            let mut association = Map::new();
            association.insert(TYPE_FIELD.into(), json!("a:has_form"));
            association.insert("form-key".into(), json!(file_stem(&path)));
            association.insert("directionality".into(), json!("DIRECTED"));
            let keys = [relative_key(root, &path)];
            self.add_association_with_keys(record, &form, association, &keys)?;
        }
        Ok(())
    }

    fn ingest_translations(&mut self, root: &Path, record: &str, folder: &Path) -> Result<()> {
        for locale_dir in sorted_entries(folder)? {
            let file = locale_dir.join("translation.json");
            if !file.is_file() {
                continue;
            }
            let locale = file_name(&locale_dir);

            let mut translation = read_object(&file)?;
            let features = object_entry(&mut translation, FEATURES_FIELD);
            features.remove("f:multilingual");
            features.insert(
                "f:translation".into(),
                json!({
                    "enabled": true,
                    "locale": locale,
                    "edition": TRANSLATION_EDITION,
                    "master-node-id": record,
                }),
            );
            let translation = self.add_node_with_keys(translation, &[])?;

            let mut association = Map::new();
            association.insert("locale".into(), json!(locale));
            association.insert("edition".into(), json!(TRANSLATION_EDITION));
            association.insert(TYPE_FIELD.into(), json!("a:has_translation"));
            association.insert("directionality".into(), json!("DIRECTED"));
            let keys = [relative_key(root, &file)];
            self.add_association_with_keys(record, &translation, association, &keys)?;

            if let Some(master) = self.record_mut(record) {
                let multilingual = master.feature_mut("f:multilingual");
                multilingual.insert("enabled".into(), Value::Bool(true));
                multilingual.insert("edition".into(), json!(TRANSLATION_EDITION));
            }

            self.ingest_attachments(&translation, &locale_dir.join("attachments"))?;
        }
        Ok(())
    }
}

fn record_kind(path: &Path) -> Option<RecordKind> {
    if path.extension()? != "json" {
        return None;
    }
    RecordKind::from_file_stem(path.file_stem()?.to_str()?)
}

/// Parse a JSON file that must hold an object.
fn read_object(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path).map_err(|e| PackagerError::io(path, e))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| PackagerError::json(path.display().to_string(), e))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(PackagerError::InvalidPayload(format!(
            "{} does not hold a JSON object",
            path.display()
        ))),
    }
}

/// Immediate children of `dir` sorted by file name; nothing if `dir` is absent.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.map(walkdir::DirEntry::into_path).map_err(|e| walk_error(dir, e)))
        .collect()
}

fn walk_error(dir: &Path, e: walkdir::Error) -> PackagerError {
    let path = e.path().unwrap_or(dir).to_path_buf();
    PackagerError::io(path, e.into())
}

/// `/`-separated path of `path` below `root`.
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
