//! Graph synthesis.
//!
//! Derives records the caller never supplied:
//!
//! 1. **Relator pass**: every object carrying `__related_node__` becomes a
//!    first-class association from the walked record to the marked target.
//! 2. **Container pass**: `_parentFolderPath` hints become a chain of folder
//!    nodes, each created once and linked to its parent with `a:child`.
//!
//! The relator pass must run first so the container pass and the resolver
//! see a closed graph.

use crate::context::RunContext;
use crate::error::{PackagerError, Result};
use crate::record::{
    scalar_text, RecordKind, FEATURES_FIELD, PARENT_FOLDER_FIELD, RELATED_NODE_MARKER, TYPE_FIELD,
};
use crate::store::RecordStore;
use crate::walk::{walk, PayloadVisitor};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Default type of user associations and relator associations.
pub const LINKED_ASSOCIATION: &str = "a:linked";
/// Structural parent → child association.
pub const CHILD_ASSOCIATION: &str = "a:child";
pub const DIRECTED: &str = "DIRECTED";

/// Meta-types whose instances describe other types.
const DEFINITION_TYPES: &[&str] = &["d:type", "d:association", "d:feature"];

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._]+").unwrap());

/// Replace every run of characters outside `[A-Za-z0-9._]` with `_`.
pub fn sanitize_filename(text: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(text, "_").into_owned()
}

/// Add a record stamped with the run's binding.
///
/// A payload carrying `_key` without `_existing` gets `_existing: {_key}` so
/// collisions on import merge instead of duplicating.
pub fn add_record(
    store: &mut RecordStore,
    ctx: &RunContext,
    kind: RecordKind,
    mut payload: Map<String, Value>,
    alternate_keys: &[String],
) -> Result<String> {
    if let Some(key) = payload.get("_key").cloned() {
        if !payload.contains_key("_existing") {
            payload.insert("_existing".to_string(), json!({ "_key": key }));
        }
    }

    let record = store.add(kind, ctx.binding(), payload, alternate_keys)?;
    Ok(record.id.clone())
}

/// Add an association between two existing records.
///
/// Stamps `source`, `target` and their types from the endpoints, and
/// defaults `_type` and `directionality`.
pub fn link(
    store: &mut RecordStore,
    ctx: &RunContext,
    source: &str,
    target: &str,
    mut payload: Map<String, Value>,
    default_type: &str,
    alternate_keys: &[String],
) -> Result<String> {
    let (source_id, source_type) = endpoint(store, source)?;
    let (target_id, target_type) = endpoint(store, target)?;

    if let Some(source_type) = source_type {
        payload.insert("source_type".into(), Value::String(source_type));
    }
    payload.insert("source".into(), Value::String(source_id));
    if let Some(target_type) = target_type {
        payload.insert("target_type".into(), Value::String(target_type));
    }
    payload.insert("target".into(), Value::String(target_id));

    if !payload.contains_key(TYPE_FIELD) {
        payload.insert(TYPE_FIELD.into(), Value::String(default_type.to_string()));
    }
    if !payload.contains_key("directionality") {
        payload.insert("directionality".into(), Value::String(DIRECTED.to_string()));
    }

    add_record(store, ctx, RecordKind::Association, payload, alternate_keys)
}

fn endpoint(store: &RecordStore, key: &str) -> Result<(String, Option<String>)> {
    let record = store
        .get(key)
        .ok_or_else(|| PackagerError::RecordNotFound(key.to_string()))?;
    Ok((record.id.clone(), record.type_qname().map(str::to_string)))
}

/// Collects `(property path, target alias)` for every relator marker.
#[derive(Default)]
struct FindRelators {
    hits: Vec<(String, String)>,
}

impl PayloadVisitor for FindRelators {
    fn visit_object(&mut self, path: &str, object: &mut Map<String, Value>) {
        if let Some(alias) = object.get(RELATED_NODE_MARKER).and_then(Value::as_str) {
            if !alias.is_empty() {
                self.hits.push((path.to_string(), alias.to_string()));
            }
        }
    }
}

/// Synthesize an association for every relator marker in the store.
///
/// Only records present when the pass starts are walked; the associations it
/// creates never carry markers themselves. Returns the number created.
pub fn synthesize_relators(store: &mut RecordStore, ctx: &RunContext) -> Result<usize> {
    let definitions: HashMap<String, usize> = (0..store.count())
        .filter_map(|i| {
            let record = store.record_at(i)?;
            let is_definition = record
                .type_qname()
                .is_some_and(|t| DEFINITION_TYPES.contains(&t));
            match (is_definition, record.qname()) {
                (true, Some(qname)) => Some((qname.to_string(), i)),
                _ => None,
            }
        })
        .collect();

    let mut created = 0;
    let walked = store.count();
    for i in 0..walked {
        let Some(record) = store.record_at_mut(i) else {
            continue;
        };
        let mut finder = FindRelators::default();
        walk(&mut record.payload, &mut finder);
        if finder.hits.is_empty() {
            continue;
        }

        let source_id = record.id.clone();
        let source_type = record.type_qname().map(str::to_string);

        for (property_path, alias) in finder.hits {
            let Some(target_id) = store.get(&alias).map(|target| target.id.clone()) else {
                debug!(source = %source_id, alias = %alias, "relator target not found, skipping");
                continue;
            };

            let association_type = source_type
                .as_deref()
                .and_then(|t| definitions.get(t))
                .and_then(|&d| store.record_at(d))
                .and_then(|definition| {
                    relator_association_type(&definition.payload, &property_path)
                })
                .unwrap_or_else(|| LINKED_ASSOCIATION.to_string());

            let mut payload = Map::new();
            payload.insert(TYPE_FIELD.into(), Value::String(association_type));
            payload.insert(
                FEATURES_FIELD.into(),
                json!({
                    "f:relator": {
                        "propertyHolder": "source",
                        "propertyPath": property_path,
                    }
                }),
            );
            let association = link(
                store,
                ctx,
                &source_id,
                &target_id,
                payload,
                LINKED_ASSOCIATION,
                &[],
            )?;
            created += 1;

            debug!(
                association = %association,
                source = %source_id,
                target = %target_id,
                path = %property_path,
                "auto-generated relator association"
            );
        }
    }

    info!(created, "relator pass complete");
    Ok(created)
}

/// `_relator.associationType` of the property a path points at.
fn relator_association_type(
    definition: &Map<String, Value>,
    property_path: &str,
) -> Option<String> {
    find_property_definition(definition, property_path)?
        .get("_relator")?
        .get("associationType")?
        .as_str()
        .map(str::to_string)
}

/// Walk a JSON-schema style definition along a payload property path.
///
/// Object keys step through `properties`, array indices through `items`.
pub fn find_property_definition<'a>(
    definition: &'a Map<String, Value>,
    property_path: &str,
) -> Option<&'a Value> {
    let path = property_path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }

    let mut node = definition;
    let mut found: Option<&'a Value> = None;
    for step in property_steps(path) {
        if let Some(value) = found {
            node = value.as_object()?;
        }
        found = Some(match step {
            PropertyStep::Member(name) => node.get("properties")?.get(name)?,
            PropertyStep::Item => node.get("items")?,
        });
    }
    found
}

enum PropertyStep<'a> {
    Member(&'a str),
    Item,
}

/// `/authors[0]/name` → member `authors`, item, member `name`.
fn property_steps(path: &str) -> Vec<PropertyStep<'_>> {
    let mut steps = Vec::new();
    for segment in path.split('/') {
        let (name, indices) = match segment.find('[') {
            Some(i) => (&segment[..i], segment[i..].matches('[').count()),
            None => (segment, 0),
        };
        if !name.is_empty() {
            steps.push(PropertyStep::Member(name));
        }
        steps.extend((0..indices).map(|_| PropertyStep::Item));
    }
    steps
}

/// Memoized folder hierarchy. A container for a path is created at most once.
#[derive(Debug)]
pub struct ContainerTree {
    root: String,
    by_path: HashMap<String, String>,
}

impl ContainerTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            by_path: HashMap::new(),
        }
    }

    /// Key of the container for `path`, creating it and its ancestors on demand.
    pub fn ensure(
        &mut self,
        store: &mut RecordStore,
        ctx: &RunContext,
        path: &str,
    ) -> Result<String> {
        let path = normalize_container_path(path);
        if path.is_empty() || path == "." {
            return Ok(self.root.clone());
        }
        if let Some(key) = self.by_path.get(path) {
            return Ok(key.clone());
        }

        let (parent_path, name) = match path.rfind('/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => ("", path),
        };
        let parent = self.ensure(store, ctx, parent_path)?;

        let mut payload = Map::new();
        payload.insert(TYPE_FIELD.into(), json!("n:node"));
        payload.insert(
            FEATURES_FIELD.into(),
            json!({
                "f:container": { "enabled": true },
                "f:filename": { "filename": sanitize_filename(name) }
            }),
        );
        payload.insert("title".into(), json!(name));
        let container = add_record(store, ctx, RecordKind::Node, payload, &[])?;
        link(store, ctx, &parent, &container, Map::new(), CHILD_ASSOCIATION, &[])?;

        if let Some(record) = store.get_mut(&container) {
            record.path = Some(path.to_string());
        }
        self.by_path.insert(path.to_string(), container.clone());
        debug!(path, container = %container, "created container");

        Ok(container)
    }

    /// Number of containers created so far (the root excluded).
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

fn normalize_container_path(path: &str) -> &str {
    path.trim_start_matches('/').trim_end_matches('/')
}

/// Materialize containers for every `_parentFolderPath` hint.
///
/// Each hinted record is linked under its nearest container and gets a
/// sanitized `f:filename`. Its full path, built from the unsanitized name,
/// is recorded for collision checks. Returns the tree so callers can inspect what was created.
pub fn synthesize_containers(
    store: &mut RecordStore,
    ctx: &RunContext,
    root: &str,
) -> Result<ContainerTree> {
    let mut tree = ContainerTree::new(root);

    let hinted = store.count();
    for i in 0..hinted {
        let Some(record) = store.record_at(i) else {
            continue;
        };
        let Some(hint) = record
            .str_field(PARENT_FOLDER_FIELD)
            .filter(|hint| !hint.is_empty())
        else {
            continue;
        };
        let container_path = normalize_container_path(hint).to_string();
        let key = record.id.clone();

        let container = tree.ensure(store, ctx, &container_path)?;
        link(store, ctx, &container, &key, Map::new(), CHILD_ASSOCIATION, &[])?;

        let Some(record) = store.record_at_mut(i) else {
            continue;
        };
        let name = preferred_file_name(&record.payload, &key);
        record
            .feature_mut("f:filename")
            .insert("filename".into(), Value::String(sanitize_filename(&name)));
        // collisions are checked on the unsanitized name
        record.path = Some(if container_path.is_empty() {
            name
        } else {
            format!("{}/{}", container_path, name)
        });
    }

    info!(containers = tree.len(), "container pass complete");
    Ok(tree)
}

/// Explicit filename hint, then an existing `f:filename`, then the title, then the alias.
fn preferred_file_name(payload: &Map<String, Value>, alias: &str) -> String {
    let hint = ["_fileName", "filename"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(scalar_text));
    let feature = || {
        payload
            .get(FEATURES_FIELD)?
            .get("f:filename")?
            .get("filename")
            .and_then(scalar_text)
    };
    let title = || payload.get("title").and_then(scalar_text);

    hint.or_else(feature)
        .or_else(title)
        .unwrap_or_else(|| alias.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx() -> RunContext {
        RunContext::with_ids("platformId", "repositoryId", "branch", "1")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    fn store_with_root(ctx: &RunContext) -> (RecordStore, String) {
        let mut store = RecordStore::new();
        let root = add_record(
            &mut store,
            ctx,
            RecordKind::Node,
            object(json!({"_qname": "r:root", "_type": "n:root"})),
            &[],
        )
        .unwrap();
        (store, root)
    }

    #[test]
    fn sanitize_replaces_unsafe_runs() {
        assert_eq!(sanitize_filename("My File (1).txt"), "My_File_1_.txt");
        assert_eq!(sanitize_filename("already_safe.v2"), "already_safe.v2");
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_filename("café"), "caf_");
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(text in ".*") {
            let once = sanitize_filename(&text);
            prop_assert_eq!(sanitize_filename(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_'));
        }
    }

    #[test]
    fn add_record_derives_existing_from_key() {
        let ctx = ctx();
        let mut store = RecordStore::new();
        let id = add_record(&mut store, &ctx, RecordKind::Node, object(json!({"_key": "k1"})), &[])
            .unwrap();
        let record = store.get(&id).unwrap();
        assert_eq!(record.payload.get("_existing"), Some(&json!({"_key": "k1"})));
        assert_eq!(record.binding.repository_id, "repositoryId");
    }

    #[test]
    fn link_stamps_endpoints_and_defaults() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let child = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({"_type": "n:node"})),
            &[],
        )
        .unwrap();

        let association =
            link(&mut store, &ctx, &root, &child, Map::new(), CHILD_ASSOCIATION, &[]).unwrap();
        let record = store.get(&association).unwrap();

        assert_eq!(record.kind, RecordKind::Association);
        assert_eq!(record.str_field("source"), Some(root.as_str()));
        assert_eq!(record.str_field("source_type"), Some("n:root"));
        assert_eq!(record.str_field("target"), Some(child.as_str()));
        assert_eq!(record.str_field("target_type"), Some("n:node"));
        assert_eq!(record.type_qname(), Some("a:child"));
        assert_eq!(record.str_field("directionality"), Some("DIRECTED"));
    }

    #[test]
    fn link_requires_both_endpoints() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let err = link(&mut store, &ctx, &root, "ghost", Map::new(), CHILD_ASSOCIATION, &[])
            .unwrap_err();
        assert!(matches!(err, PackagerError::RecordNotFound(key) if key == "ghost"));
    }

    #[test]
    fn container_memoization() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let mut tree = ContainerTree::new(&root);

        let first = tree.ensure(&mut store, &ctx, "/a/b/c").unwrap();
        let after_first = store.count();
        let second = tree.ensure(&mut store, &ctx, "/a/b/c").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count(), after_first);
        assert_eq!(tree.len(), 3);

        let titles: Vec<String> = store
            .iter()
            .filter(|r| r.feature("f:container").is_some())
            .filter_map(|r| r.title())
            .collect();
        assert_eq!(titles, ["a", "b", "c"]);

        let c = store.get(&first).unwrap();
        assert_eq!(c.path.as_deref(), Some("a/b/c"));
        assert_eq!(
            tree.ensure(&mut store, &ctx, "a/b/").unwrap(),
            tree.ensure(&mut store, &ctx, "/a/b").unwrap()
        );
    }

    #[test]
    fn container_root_paths() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let mut tree = ContainerTree::new(&root);
        for path in ["", "/", ".", "//"] {
            assert_eq!(tree.ensure(&mut store, &ctx, path).unwrap(), root);
        }
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn container_pass_places_records() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let home = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({"title": "Home Page", "_parentFolderPath": "/docs/"})),
            &[],
        )
        .unwrap();
        let named = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({
                "title": "ignored",
                "_fileName": "index.html",
                "_parentFolderPath": "/docs"
            })),
            &[],
        )
        .unwrap();
        let untitled = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({"_parentFolderPath": "/"})),
            &[],
        )
        .unwrap();

        let tree = synthesize_containers(&mut store, &ctx, &root).unwrap();
        assert_eq!(tree.len(), 1);

        let home_record = store.get(&home).unwrap();
        assert_eq!(home_record.path.as_deref(), Some("docs/Home Page"));
        assert_eq!(
            home_record.feature("f:filename").and_then(|f| f.get("filename")),
            Some(&json!("Home_Page"))
        );
        assert_eq!(store.get(&named).unwrap().path.as_deref(), Some("docs/index.html"));
        let untitled_record = store.get(&untitled).unwrap();
        assert_eq!(untitled_record.path.as_deref(), Some(untitled.as_str()));
        assert_eq!(
            untitled_record.feature("f:filename").and_then(|f| f.get("filename")),
            Some(&json!(sanitize_filename(&untitled)))
        );

        // root → docs, docs → home, docs → named, root → untitled
        let mut children = 0;
        store.for_each(Some(RecordKind::Association), |_, r| {
            assert_eq!(r.type_qname(), Some("a:child"));
            children += 1;
        });
        assert_eq!(children, 4);
    }

    #[test]
    fn names_that_sanitize_alike_keep_distinct_paths() {
        let ctx = ctx();
        let (mut store, root) = store_with_root(&ctx);
        let mut add = |title: &str| {
            let payload = object(json!({"title": title, "_parentFolderPath": "/docs"}));
            add_record(&mut store, &ctx, RecordKind::Node, payload, &[]).unwrap()
        };
        let spaced = add("Home Page");
        let underscored = add("Home_Page");

        synthesize_containers(&mut store, &ctx, &root).unwrap();

        let spaced = store.get(&spaced).unwrap();
        let underscored = store.get(&underscored).unwrap();
        assert_eq!(spaced.path.as_deref(), Some("docs/Home Page"));
        assert_eq!(underscored.path.as_deref(), Some("docs/Home_Page"));
        assert_eq!(spaced.feature("f:filename"), underscored.feature("f:filename"));
        assert!(crate::finisher::verify_paths(&store).is_ok());
    }

    #[test]
    fn relator_pass_uses_definition_type() {
        let ctx = ctx();
        let mut store = RecordStore::new();
        add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({
                "_type": "d:type",
                "_qname": "my:article",
                "properties": {
                    "author": {
                        "type": "object",
                        "_relator": {"associationType": "my:authored-by"}
                    },
                    "reviewers": {
                        "type": "array",
                        "items": {"_relator": {"associationType": "my:reviewed-by"}}
                    }
                }
            })),
            &[],
        )
        .unwrap();
        let author = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({"_alias": "jon", "_type": "my:author"})),
            &[],
        )
        .unwrap();
        let article = add_record(
            &mut store,
            &ctx,
            RecordKind::Node,
            object(json!({
                "_type": "my:article",
                "author": {"__related_node__": "jon"},
                "reviewers": [{"__related_node__": "jon"}],
                "other": {"__related_node__": "jon"},
                "missing": {"__related_node__": "nobody"}
            })),
            &[],
        )
        .unwrap();

        let created = synthesize_relators(&mut store, &ctx).unwrap();
        assert_eq!(created, 3);

        let mut by_path = HashMap::new();
        store.for_each(Some(RecordKind::Association), |_, r| {
            assert_eq!(r.str_field("source"), Some(article.as_str()));
            assert_eq!(r.str_field("target"), Some(author.as_str()));
            let path = r
                .feature("f:relator")
                .and_then(|f| f.get("propertyPath"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            by_path.insert(path, r.type_qname().unwrap_or_default().to_string());
        });
        assert_eq!(by_path["/author"], "my:authored-by");
        assert_eq!(by_path["/reviewers[0]"], "my:reviewed-by");
        assert_eq!(by_path["/other"], "a:linked");

        // a second pass only re-finds the source markers, associations carry none
        let again = synthesize_relators(&mut store, &ctx).unwrap();
        assert_eq!(again, 3);
    }

    #[test]
    fn property_definition_lookup() {
        let definition = object(json!({
            "properties": {
                "authors": {"items": {"properties": {"name": {"type": "string"}}}}
            }
        }));
        assert_eq!(
            find_property_definition(&definition, "/authors[0]/name"),
            Some(&json!({"type": "string"}))
        );
        assert!(find_property_definition(&definition, "/").is_none());
        assert!(find_property_definition(&definition, "/nope").is_none());
    }
}
