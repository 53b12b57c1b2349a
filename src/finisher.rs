//! Record finishing: attachment metadata, cleanup and path verification.
//!
//! Runs after resolution, so every record already carries its permanent
//! identifier.

use crate::error::{PackagerError, Result};
use crate::graph::LINKED_ASSOCIATION;
use crate::media::MediaTypes;
use crate::record::{object_entry, QNAME_FIELD, SYSTEM_FIELD, WORKING_FIELDS};
use crate::store::RecordStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

/// Parent type given to type definitions that name none.
const DEFAULT_TYPE_PARENT: &str = "n:node";

/// Write `_system.attachments.<id>` metadata for every queued attachment.
///
/// Returns the number of attachments bound.
pub async fn bind_attachments(store: &mut RecordStore, media: &dyn MediaTypes) -> Result<usize> {
    info!("binding attachments");

    let mut bound = 0;
    for record in store.iter_mut() {
        if record.attachments.is_empty() {
            continue;
        }

        let mut entries = Vec::with_capacity(record.attachments.len());
        for attachment in &record.attachments {
            let metadata = tokio::fs::metadata(&attachment.source)
                .await
                .map_err(|e| PackagerError::io(&attachment.source, e))?;
            let filename = attachment
                .source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            entries.push((
                attachment.id.clone(),
                json!({
                    "contentType": media.lookup(&attachment.source),
                    "length": metadata.len(),
                    "objectId": "",
                    "filename": filename,
                }),
            ));
        }

        let system = object_entry(&mut record.payload, SYSTEM_FIELD);
        let attachments = object_entry(system, "attachments");
        for (id, entry) in entries {
            attachments.insert(id, entry);
            bound += 1;
        }
    }

    info!(bound, "completed binding of attachments");
    Ok(bound)
}

/// Ensure qualified names and type tags, then strip working fields.
///
/// A record without `_type` is a structural violation and fails the run.
pub fn cleanup(store: &mut RecordStore) -> Result<()> {
    info!("starting cleanup of records");

    for record in store.iter_mut() {
        let placeholder = record.resolved_alias().map(|alias| format!("o:{}", alias));
        let derived = format!("o:{}", record.id);

        let needs_qname = match record.payload.get(QNAME_FIELD).and_then(Value::as_str) {
            None | Some("") => true,
            Some(qname) => placeholder.as_deref() == Some(qname),
        };
        if needs_qname {
            record
                .payload
                .insert(QNAME_FIELD.into(), Value::String(derived));
        }

        let parent = match record.type_qname() {
            None | Some("") => {
                return Err(PackagerError::MissingTypeTag {
                    id: record.id.clone(),
                    payload: Value::Object(record.payload.clone()).to_string(),
                });
            }
            Some("d:type") => Some(DEFAULT_TYPE_PARENT),
            Some("d:association") => Some(LINKED_ASSOCIATION),
            Some(_) => None,
        };
        if let Some(parent) = parent {
            if !record.payload.contains_key("_parent") {
                record
                    .payload
                    .insert("_parent".into(), Value::String(parent.to_string()));
            }
        }

        for field in WORKING_FIELDS {
            record.payload.remove(*field);
        }
    }

    info!("completed cleanup of records");
    Ok(())
}

/// Fail if two records claim the same hierarchy path.
pub fn verify_paths(store: &RecordStore) -> Result<()> {
    info!("starting verification of records");

    let mut by_path: HashMap<&str, usize> = HashMap::new();
    for (i, record) in store.iter().enumerate() {
        let Some(path) = record.path.as_deref() else {
            continue;
        };
        if let Some(&first) = by_path.get(path) {
            let payload_at = |index: usize| {
                store
                    .record_at(index)
                    .map(|r| Value::Object(r.payload.clone()).to_string())
                    .unwrap_or_default()
            };
            return Err(PackagerError::DuplicatePath {
                path: path.to_string(),
                first: payload_at(first),
                second: payload_at(i),
            });
        }
        by_path.insert(path, i);
    }

    info!(paths = by_path.len(), "completed verification of records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::GuessMediaTypes;
    use crate::record::{Binding, RecordKind};
    use serde_json::Map;
    use tempfile::TempDir;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    fn add(store: &mut RecordStore, value: Value) -> String {
        store
            .add(RecordKind::Node, Binding::new("r", "b"), object(value), &[])
            .unwrap()
            .id
            .clone()
    }

    #[tokio::test]
    async fn bind_attachments_writes_metadata() {
        let dir = TempDir::new().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, vec![0u8; 1234]).unwrap();
        let blob = dir.path().join("blob.zzqx");
        std::fs::write(&blob, b"x").unwrap();

        let mut store = RecordStore::new();
        let id = add(&mut store, json!({"_type": "n:node"}));
        store.add_attachment(&id, "default", &photo).unwrap();
        store.add_attachment(&id, "raw", &blob).unwrap();

        let bound = bind_attachments(&mut store, &GuessMediaTypes).await.unwrap();
        assert_eq!(bound, 2);

        let system = &store.get(&id).unwrap().payload["_system"]["attachments"];
        assert_eq!(
            system["default"],
            json!({
                "contentType": "image/jpeg",
                "length": 1234,
                "objectId": "",
                "filename": "photo.jpg"
            })
        );
        assert_eq!(system["raw"]["contentType"], Value::Null);
    }

    #[tokio::test]
    async fn bind_attachments_fails_on_vanished_source() {
        let dir = TempDir::new().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, b"jpg").unwrap();

        let mut store = RecordStore::new();
        let id = add(&mut store, json!({"_type": "n:node"}));
        store.add_attachment(&id, "default", &photo).unwrap();
        std::fs::remove_file(&photo).unwrap();

        let err = bind_attachments(&mut store, &GuessMediaTypes).await.unwrap_err();
        assert!(matches!(err, PackagerError::Io { .. }));
    }

    #[test]
    fn cleanup_derives_qname_and_strips_working_fields() {
        let mut store = RecordStore::new();
        let alias = add(
            &mut store,
            json!({
                "_type": "n:node",
                "_alias": "x",
                "_parentFolderPath": "/docs",
                "_fileName": "a",
                "_filename": "a",
                "_path": "p",
                "title": "kept"
            }),
        );
        store.resolve(&alias, "final").unwrap();

        cleanup(&mut store).unwrap();

        let record = store.get("final").unwrap();
        assert_eq!(record.qname(), Some("o:final"));
        for field in WORKING_FIELDS {
            assert!(!record.payload.contains_key(*field), "{} survived", field);
        }
        assert_eq!(record.title().as_deref(), Some("kept"));
    }

    #[test]
    fn cleanup_rewrites_alias_qname_and_keeps_real_ones() {
        let mut store = RecordStore::new();
        let placeholder = add(&mut store, json!({"_type": "n:node"}));
        store
            .get_mut(&placeholder)
            .unwrap()
            .payload
            .insert(QNAME_FIELD.into(), json!(format!("o:{}", placeholder)));
        let named = add(&mut store, json!({"_type": "n:node", "_qname": "my:named"}));
        store.resolve(&placeholder, "f1").unwrap();
        store.resolve(&named, "f2").unwrap();

        cleanup(&mut store).unwrap();

        assert_eq!(store.get("f1").unwrap().qname(), Some("o:f1"));
        assert_eq!(store.get("f2").unwrap().qname(), Some("my:named"));
    }

    #[test]
    fn cleanup_defaults_definition_parents() {
        let mut store = RecordStore::new();
        let t = add(&mut store, json!({"_type": "d:type", "_qname": "my:article"}));
        let a = add(&mut store, json!({"_type": "d:association", "_qname": "my:authored-by"}));
        let own = add(
            &mut store,
            json!({"_type": "d:type", "_qname": "my:sub", "_parent": "my:article"}),
        );

        cleanup(&mut store).unwrap();

        assert_eq!(store.get(&t).unwrap().str_field("_parent"), Some("n:node"));
        assert_eq!(store.get(&a).unwrap().str_field("_parent"), Some("a:linked"));
        assert_eq!(store.get(&own).unwrap().str_field("_parent"), Some("my:article"));
    }

    #[test]
    fn cleanup_rejects_missing_type() {
        let mut store = RecordStore::new();
        add(&mut store, json!({"_type": "n:node"}));
        add(&mut store, json!({"title": "untyped"}));

        let err = cleanup(&mut store).unwrap_err();
        assert!(matches!(
            err,
            PackagerError::MissingTypeTag { ref payload, .. } if payload.contains("untyped")
        ));
        assert!(err.is_structural());
    }

    #[test]
    fn verify_detects_duplicate_paths() {
        let mut store = RecordStore::new();
        let a = add(&mut store, json!({"_type": "n:node", "title": "one"}));
        let b = add(&mut store, json!({"_type": "n:node", "title": "two"}));
        add(&mut store, json!({"_type": "n:node"}));

        store.get_mut(&a).unwrap().path = Some("docs/Home".into());
        store.get_mut(&b).unwrap().path = Some("docs/Other".into());
        assert!(verify_paths(&store).is_ok());

        store.get_mut(&b).unwrap().path = Some("docs/Home".into());
        let err = verify_paths(&store).unwrap_err();
        match err {
            PackagerError::DuplicatePath { path, first, second } => {
                assert_eq!(path, "docs/Home");
                assert!(first.contains("one"));
                assert!(second.contains("two"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
