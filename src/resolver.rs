//! Two-phase reference resolution.
//!
//! Records are compiled under aliases. Once the graph is closed the resolver
//! finds every string that names another record, swaps each alias for a
//! permanent identifier everywhere it occurs, and checks nothing was missed.
//!
//! # Phases
//!
//! 1. Discovery: index every known name, scan all payload strings, record a
//!    back-reference per hit and normalize the hit to the record's key.
//! 2. Acquisition: one identifier per record, assigned in insertion order.
//! 3. Substitution: rewrite each alias inside its referrers (relator markers
//!    become resolved descriptors), then rekey the record itself.
//! 4. Association normalization: backfill endpoint types and directionality.
//! 5. Completeness: every alias resolved.
//!
//! Any string equal to a known alias is treated as a reference, whichever
//! field it sits in. A title that happens to match another record's alias
//! will be rewritten too.

use crate::context::RunContext;
use crate::error::Result;
use crate::graph::DIRECTED;
use crate::ids::{acquire, IdIssuer};
use crate::record::{RecordKind, QNAME_FIELD, RELATED_NODE_MARKER, TYPE_FIELD};
use crate::store::RecordStore;
use crate::walk::{walk, PayloadVisitor, ReplaceStrings};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Outcome of a resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Back-reference edges found during discovery.
    pub references: usize,
    /// Records rekeyed to permanent identifiers.
    pub resolved: usize,
    /// Plain string occurrences rewritten from an alias to its identifier.
    pub rewritten: usize,
}

/// Links a closed record graph.
pub struct ReferenceResolver<'a> {
    ctx: &'a RunContext,
    issuer: &'a dyn IdIssuer,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(ctx: &'a RunContext, issuer: &'a dyn IdIssuer) -> Self {
        Self { ctx, issuer }
    }

    /// Run every phase. Fails if any alias is left unresolved.
    pub async fn resolve(&self, store: &mut RecordStore) -> Result<ResolutionReport> {
        let references = discover_references(store);

        let ids = acquire(self.issuer, store.count()).await?;

        let (resolved, rewritten) = self.substitute(store, &ids)?;
        normalize_associations(store);

        store.assert_fully_resolved()?;
        info!(references, resolved, "compilation references and aliases resolved");

        Ok(ResolutionReport {
            references,
            resolved,
            rewritten,
        })
    }

    /// Rewrite every alias to its identifier, record by record in insertion order.
    ///
    /// Returns the number of records resolved and of string occurrences rewritten.
    fn substitute(&self, store: &mut RecordStore, ids: &[String]) -> Result<(usize, usize)> {
        let aliases: Vec<String> = store.iter().map(|record| record.id.clone()).collect();
        let total = aliases.len();
        info!(total, "resolving aliases");

        let mut rewritten = 0;
        for (i, (alias, final_id)) in aliases.iter().zip(ids).enumerate() {
            if i % 1000 == 0 {
                info!(resolved = i, total, "resolving aliases");
            }

            let descriptor = store
                .get(alias)
                .map(|target| RelatedDescriptor {
                    qname: target.payload.get(QNAME_FIELD).cloned(),
                    type_qname: target.payload.get(TYPE_FIELD).cloned(),
                    title: target.title().unwrap_or_else(|| final_id.clone()),
                    locator: self.ctx.node_ref(final_id),
                })
                .unwrap_or_else(|| RelatedDescriptor::bare(self.ctx, final_id));

            let mut visited = HashSet::new();
            let referrers = store.back_references(alias).to_vec();
            for referrer in referrers {
                if !visited.insert(referrer.clone()) {
                    continue;
                }
                let Some(record) = store.get_mut(&referrer) else {
                    warn!(referrer = %referrer, alias = %alias, "missing record for reference");
                    continue;
                };
                let mut substitute = Substitute {
                    strings: ReplaceStrings::new(alias, final_id),
                    descriptor: &descriptor,
                };
                walk(&mut record.payload, &mut substitute);
                rewritten += substitute.strings.replaced;
            }

            store.resolve(alias, final_id)?;
        }

        info!(resolved = total, total, rewritten, "resolving aliases");
        Ok((total, rewritten))
    }
}

/// Scan every payload for strings naming a known record.
///
/// Each hit adds a back-reference from the named record to the scanning
/// record and is normalized in place to the named record's current key
/// (so an alternate key such as a source file path becomes the alias).
/// Returns the number of edges found.
pub fn discover_references(store: &mut RecordStore) -> usize {
    let index = store.key_index();
    let mut edges = Vec::new();

    for i in 0..store.count() {
        let Some(record) = store.record_at_mut(i) else {
            continue;
        };
        let mut discover = DiscoverReferences {
            index: &index,
            found: Vec::new(),
        };
        walk(&mut record.payload, &mut discover);
        let ours = record.id.clone();
        edges.extend(discover.found.into_iter().map(|target| (target, ours.clone())));
    }

    let count = edges.len();
    for (target, source) in edges {
        store.add_back_reference(&target, &source);
    }
    info!(references = count, "reference discovery complete");
    count
}

struct DiscoverReferences<'a> {
    index: &'a HashMap<String, String>,
    found: Vec<String>,
}

impl PayloadVisitor for DiscoverReferences<'_> {
    fn visit_string(&mut self, _path: &str, value: &mut String) {
        if let Some(key) = self.index.get(value.as_str()) {
            self.found.push(key.clone());
            if value != key {
                *value = key.clone();
            }
        }
    }
}

/// What a relator marker is replaced with once its target is resolved.
struct RelatedDescriptor {
    qname: Option<Value>,
    type_qname: Option<Value>,
    title: String,
    locator: String,
}

impl RelatedDescriptor {
    fn bare(ctx: &RunContext, id: &str) -> Self {
        Self {
            qname: None,
            type_qname: None,
            title: id.to_string(),
            locator: ctx.node_ref(id),
        }
    }

    fn apply(&self, object: &mut Map<String, Value>, id: &str) {
        object.remove(RELATED_NODE_MARKER);
        object.insert("id".into(), Value::String(id.to_string()));
        object.insert("ref".into(), Value::String(self.locator.clone()));
        if let Some(qname) = &self.qname {
            object.insert("qname".into(), qname.clone());
        }
        if let Some(type_qname) = &self.type_qname {
            object.insert("typeQName".into(), type_qname.clone());
        }
        object.insert("title".into(), Value::String(self.title.clone()));
    }
}

/// Patches relator markers naming the alias, then rewrites plain occurrences.
struct Substitute<'a> {
    strings: ReplaceStrings<'a>,
    descriptor: &'a RelatedDescriptor,
}

impl PayloadVisitor for Substitute<'_> {
    fn visit_object(&mut self, _path: &str, object: &mut Map<String, Value>) {
        if object.get(RELATED_NODE_MARKER).and_then(Value::as_str) == Some(self.strings.from) {
            self.descriptor.apply(object, self.strings.to);
        }
    }

    fn visit_string(&mut self, path: &str, value: &mut String) {
        self.strings.visit_string(path, value);
    }
}

/// Backfill `source_type`/`target_type` from the endpoints and default
/// `directionality` on every association.
pub fn normalize_associations(store: &mut RecordStore) {
    let mut fixes = Vec::new();
    for (i, record) in store.iter().enumerate() {
        if record.kind != RecordKind::Association {
            continue;
        }
        let endpoint_type = |field: &str, type_field: &str| -> Option<Value> {
            if record.payload.contains_key(type_field) {
                return None;
            }
            let endpoint = record.str_field(field)?;
            store.get(endpoint)?.payload.get(TYPE_FIELD).cloned()
        };
        fixes.push((
            i,
            endpoint_type("source", "source_type"),
            endpoint_type("target", "target_type"),
        ));
    }

    for (i, source_type, target_type) in fixes {
        let Some(record) = store.record_at_mut(i) else {
            continue;
        };
        if let Some(source_type) = source_type {
            record.payload.insert("source_type".into(), source_type);
        }
        if let Some(target_type) = target_type {
            record.payload.insert("target_type".into(), target_type);
        }
        if !record.payload.contains_key("directionality") {
            record
                .payload
                .insert("directionality".into(), Value::String(DIRECTED.to_string()));
        }
    }
}
