//! Record store.
//!
//! Records live in an arena indexed by insertion order. Lookups go through
//! string tables that point into the arena, so rekeying a record from its
//! alias to its permanent identifier never moves the record itself.
//!
//! ```text
//! alternate key ──┐
//! alias ──► final id (after resolve) ──► key table ──► arena index ──► Record
//! ```

use crate::error::{PackagerError, Result};
use crate::record::{Attachment, Binding, Record, RecordKind, ALIAS_FIELD, DOC_FIELD};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

/// Prefix of generated aliases.
pub const ALIAS_PREFIX: &str = "alias-";

/// Owns every record of a packaging run.
#[derive(Debug, Default)]
pub struct RecordStore {
    /// Records in insertion order.
    records: Vec<Record>,
    /// Current key (alias or final id) → arena index.
    keys: HashMap<String, usize>,
    /// Alternate lookup key → arena index.
    alternate_keys: HashMap<String, usize>,
    /// Alias → final id, filled by `resolve`.
    resolved: HashMap<String, String>,
    /// Referenced key → keys of the records whose payload points at it.
    back_references: HashMap<String, Vec<String>>,
    alias_counter: usize,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record under a fresh alias (or the `_alias` the payload asks for).
    pub fn add(
        &mut self,
        kind: RecordKind,
        binding: Binding,
        payload: Map<String, Value>,
        alternate_keys: &[String],
    ) -> Result<&Record> {
        let requested = payload
            .get(ALIAS_FIELD)
            .and_then(Value::as_str)
            .filter(|alias| !alias.is_empty())
            .map(str::to_string);

        if payload.contains_key(DOC_FIELD) {
            return Err(PackagerError::PredefinedDocField {
                alias: requested.unwrap_or_default(),
            });
        }

        let alias = match requested {
            Some(alias) if self.keys.contains_key(&alias) || self.resolved.contains_key(&alias) => {
                return Err(PackagerError::DuplicateAlias(alias));
            }
            Some(alias) => alias,
            None => self.next_alias(),
        };

        let index = self.records.len();
        self.keys.insert(alias.clone(), index);
        for key in alternate_keys {
            self.alternate_keys.insert(key.clone(), index);
        }
        self.records.push(Record::new(alias, kind, binding, payload));

        Ok(&self.records[index])
    }

    fn next_alias(&mut self) -> String {
        loop {
            let alias = format!("{}{}", ALIAS_PREFIX, self.alias_counter);
            self.alias_counter += 1;
            if !self.keys.contains_key(&alias) && !self.resolved.contains_key(&alias) {
                return alias;
            }
        }
    }

    /// Queue a blob to be copied alongside a record.
    pub fn add_attachment(
        &mut self,
        key: &str,
        attachment_id: &str,
        source: &Path,
    ) -> Result<&Record> {
        let index = self
            .index_of(key)
            .ok_or_else(|| PackagerError::RecordNotFound(key.to_string()))?;

        if !source.is_file() {
            return Err(PackagerError::MissingAttachmentSource {
                record: key.to_string(),
                attachment_id: attachment_id.to_string(),
                path: source.to_path_buf(),
            });
        }

        let record = &mut self.records[index];
        record.attachments.push(Attachment {
            id: attachment_id.to_string(),
            source: source.to_path_buf(),
        });
        Ok(&*record)
    }

    /// Arena index for an alternate key, alias, or final id.
    ///
    /// A miss is not an error: most strings are plain data.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        if let Some(&index) = self.alternate_keys.get(key) {
            return Some(index);
        }
        let key = self.resolved.get(key).map(String::as_str).unwrap_or(key);
        self.keys.get(key).copied()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.index_of(key).map(|index| &self.records[index])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Record> {
        self.index_of(key).map(move |index| &mut self.records[index])
    }

    pub fn record_at(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn record_at_mut(&mut self, index: usize) -> Option<&mut Record> {
        self.records.get_mut(index)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order, whatever their current key.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.records.iter_mut()
    }

    /// Visit records in insertion order, optionally only those of one kind.
    pub fn for_each<F>(&self, kind: Option<RecordKind>, mut visitor: F)
    where
        F: FnMut(&str, &Record),
    {
        for record in self
            .records
            .iter()
            .filter(|record| kind.is_none_or(|kind| record.kind == kind))
        {
            visitor(&record.id, record);
        }
    }

    /// Every string that currently names a record, mapped to that record's key.
    ///
    /// Covers current keys, alternate keys and resolved aliases. Built once
    /// before a scan so matching each scalar is a single hash lookup.
    pub fn key_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::with_capacity(
            self.keys.len() + self.alternate_keys.len() + self.resolved.len(),
        );
        for (key, &i) in &self.keys {
            index.insert(key.clone(), self.records[i].id.clone());
        }
        for (alias, final_id) in &self.resolved {
            index.insert(alias.clone(), final_id.clone());
        }
        for (key, &i) in &self.alternate_keys {
            index.insert(key.clone(), self.records[i].id.clone());
        }
        index
    }

    /// Note that `source` holds a pointer to `target`. Duplicates are kept.
    pub fn add_back_reference(&mut self, target: &str, source: &str) {
        self.back_references
            .entry(target.to_string())
            .or_default()
            .push(source.to_string());
    }

    /// Keys of the records that point at `target`.
    pub fn back_references(&self, target: &str) -> &[String] {
        self.back_references
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rekey a record from its alias to its permanent identifier.
    ///
    /// The alias key is removed in the same step the final key is inserted,
    /// and the identifier is stamped onto the payload as `_doc`.
    pub fn resolve(&mut self, alias: &str, final_id: &str) -> Result<()> {
        let index = self
            .keys
            .remove(alias)
            .ok_or_else(|| PackagerError::UnknownAlias(alias.to_string()))?;

        self.keys.insert(final_id.to_string(), index);
        self.resolved
            .insert(alias.to_string(), final_id.to_string());

        let record = &mut self.records[index];
        record.alias = Some(alias.to_string());
        record.id = final_id.to_string();
        record
            .payload
            .insert(DOC_FIELD.to_string(), Value::String(final_id.to_string()));
        Ok(())
    }

    pub fn resolved_id(&self, alias: &str) -> Option<&str> {
        self.resolved.get(alias).map(String::as_str)
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Every record must have gone through `resolve` exactly once.
    pub fn assert_fully_resolved(&self) -> Result<()> {
        if self.resolved.len() != self.records.len() {
            return Err(PackagerError::UnresolvedAliases {
                resolved: self.resolved.len(),
                expected: self.records.len(),
            });
        }
        Ok(())
    }

    /// Ordered slice of the current record set. `limit == None` is unbounded.
    ///
    /// A skip past the end yields an empty page. The skip is never reset to
    /// zero, so an out-of-range window selects nothing rather than everything.
    pub fn page(&self, skip: usize, limit: Option<usize>) -> PageView<'_> {
        let start = skip.min(self.records.len());
        let end = match limit {
            Some(limit) => start.saturating_add(limit).min(self.records.len()),
            None => self.records.len(),
        };
        PageView {
            records: &self.records,
            range: start..end,
        }
    }
}

/// A live, size-bounded window over the store.
#[derive(Debug, Clone)]
pub struct PageView<'a> {
    records: &'a [Record],
    range: Range<usize>,
}

impl<'a> PageView<'a> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Positional range within the store.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// `(position, key, record)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a str, &'a Record)> + '_ {
        let records = self.records;
        self.range
            .clone()
            .map(move |i| (i, records[i].id.as_str(), &records[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object payload expected"),
        }
    }

    fn binding() -> Binding {
        Binding::new("repositoryId", "branch")
    }

    fn add(store: &mut RecordStore, value: Value) -> String {
        store
            .add(RecordKind::Node, binding(), payload(value), &[])
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn add_assigns_unique_aliases() {
        let mut store = RecordStore::new();
        let a = add(&mut store, json!({"title": "a"}));
        let b = add(&mut store, json!({"title": "b"}));
        assert_ne!(a, b);
        assert!(a.starts_with(ALIAS_PREFIX));
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn add_honours_requested_alias() {
        let mut store = RecordStore::new();
        let id = add(&mut store, json!({"_alias": "dt", "title": "Daenerys"}));
        assert_eq!(id, "dt");
        assert_eq!(store.get("dt").and_then(Record::title).as_deref(), Some("Daenerys"));
    }

    #[test]
    fn generated_alias_skips_requested_ones() {
        let mut store = RecordStore::new();
        add(&mut store, json!({"_alias": "alias-0"}));
        let generated = add(&mut store, json!({}));
        assert_eq!(generated, "alias-1");
    }

    #[test]
    fn add_rejects_predefined_doc() {
        let mut store = RecordStore::new();
        let err = store
            .add(RecordKind::Node, binding(), payload(json!({"_doc": "x"})), &[])
            .unwrap_err();
        assert!(matches!(err, PackagerError::PredefinedDocField { .. }));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn add_rejects_duplicate_alias() {
        let mut store = RecordStore::new();
        add(&mut store, json!({"_alias": "same"}));
        let err = store
            .add(RecordKind::Node, binding(), payload(json!({"_alias": "same"})), &[])
            .unwrap_err();
        assert!(matches!(err, PackagerError::DuplicateAlias(alias) if alias == "same"));
    }

    #[test]
    fn alternate_keys_resolve_to_record() {
        let mut store = RecordStore::new();
        let id = store
            .add(
                RecordKind::Node,
                binding(),
                payload(json!({})),
                &["types/article/node.json".to_string()],
            )
            .unwrap()
            .id
            .clone();
        assert_eq!(store.get("types/article/node.json").map(|r| r.id.as_str()), Some(id.as_str()));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn add_attachment_requires_record_and_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, b"jpg").unwrap();

        let mut store = RecordStore::new();
        let id = add(&mut store, json!({}));

        let err = store.add_attachment("missing", "default", &file).unwrap_err();
        assert!(matches!(err, PackagerError::RecordNotFound(_)));

        let err = store
            .add_attachment(&id, "default", &dir.path().join("absent.jpg"))
            .unwrap_err();
        assert!(matches!(err, PackagerError::MissingAttachmentSource { .. }));

        let record = store.add_attachment(&id, "default", &file).unwrap();
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].id, "default");
    }

    #[test]
    fn resolve_rekeys_and_stamps_doc() {
        let mut store = RecordStore::new();
        let alias = add(&mut store, json!({"title": "Home"}));

        store.resolve(&alias, "f1").unwrap();

        let record = store.get("f1").unwrap();
        assert_eq!(record.id, "f1");
        assert_eq!(record.resolved_alias(), Some(alias.as_str()));
        assert_eq!(record.payload.get("_doc"), Some(&json!("f1")));
        // the alias still finds the record through the resolution table
        assert_eq!(store.get(&alias).map(|r| r.id.as_str()), Some("f1"));
        assert_eq!(store.resolved_id(&alias), Some("f1"));
        // but it is no longer a primary key
        assert!(matches!(
            store.resolve(&alias, "f2"),
            Err(PackagerError::UnknownAlias(_))
        ));
    }

    #[test]
    fn assert_fully_resolved_counts() {
        let mut store = RecordStore::new();
        assert!(store.assert_fully_resolved().is_ok());

        let a = add(&mut store, json!({}));
        let b = add(&mut store, json!({}));
        store.resolve(&a, "id-a").unwrap();

        let err = store.assert_fully_resolved().unwrap_err();
        assert!(matches!(
            err,
            PackagerError::UnresolvedAliases { resolved: 1, expected: 2 }
        ));

        store.resolve(&b, "id-b").unwrap();
        assert!(store.assert_fully_resolved().is_ok());
    }

    #[test]
    fn back_references_keep_duplicates() {
        let mut store = RecordStore::new();
        store.add_back_reference("a", "b");
        store.add_back_reference("a", "b");
        assert_eq!(store.back_references("a"), ["b", "b"]);
        assert!(store.back_references("b").is_empty());
    }

    #[test]
    fn for_each_keeps_insertion_order_after_resolution() {
        let mut store = RecordStore::new();
        let a = add(&mut store, json!({"title": "a"}));
        let b = add(&mut store, json!({"title": "b"}));
        store
            .add(RecordKind::Association, binding(), payload(json!({"title": "c"})), &[])
            .unwrap();
        store.resolve(&b, "zzz").unwrap();
        store.resolve(&a, "aaa").unwrap();

        let mut seen = Vec::new();
        store.for_each(None, |key, _| seen.push(key.to_string()));
        assert_eq!(seen[..2], ["aaa", "zzz"]);

        let mut associations = 0;
        store.for_each(Some(RecordKind::Association), |_, _| associations += 1);
        assert_eq!(associations, 1);
    }

    #[test]
    fn key_index_covers_every_name() {
        let mut store = RecordStore::new();
        let a = store
            .add(RecordKind::Node, binding(), payload(json!({})), &["file.json".into()])
            .unwrap()
            .id
            .clone();
        store.resolve(&a, "final").unwrap();

        let index = store.key_index();
        assert_eq!(index.get("final").map(String::as_str), Some("final"));
        assert_eq!(index.get(&a).map(String::as_str), Some("final"));
        assert_eq!(index.get("file.json").map(String::as_str), Some("final"));
    }

    #[test]
    fn page_is_ordered_and_bounded() {
        let mut store = RecordStore::new();
        for i in 0..5 {
            add(&mut store, json!({"n": i}));
        }

        let all = store.page(0, None);
        assert_eq!(all.len(), store.count());

        let page = store.page(1, Some(2));
        let positions: Vec<usize> = page.iter().map(|(i, _, _)| i).collect();
        assert_eq!(positions, [1, 2]);

        assert_eq!(store.page(4, Some(10)).len(), 1);
        assert!(store.page(9, None).is_empty());
    }

    #[test]
    fn skip_past_the_end_selects_nothing() {
        let mut store = RecordStore::new();
        for i in 0..3 {
            add(&mut store, json!({"n": i}));
        }

        let page = store.page(3, Some(2));
        assert!(page.is_empty());
        assert_eq!(page.range(), 3..3);
        assert!(store.page(usize::MAX, Some(usize::MAX)).is_empty());
    }

    #[test]
    fn page_reflects_current_keys() {
        let mut store = RecordStore::new();
        let a = add(&mut store, json!({}));
        store.resolve(&a, "final").unwrap();
        let keys: Vec<&str> = store.page(0, None).iter().map(|(_, k, _)| k).collect();
        assert_eq!(keys, ["final"]);
    }
}
