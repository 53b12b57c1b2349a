//! Shape-free walking over record payloads.
//!
//! Payloads are JSON trees, so recursion always terminates even when the
//! record graph built from them has cycles. Objects are visited before their
//! members, which lets a visitor rewrite an object and then have the walk
//! descend into whatever it left behind.

use serde_json::{Map, Value};

/// Callbacks for [`walk`]. Every method defaults to doing nothing.
///
/// `path` is `/` for the payload root, `/key` for object members and
/// `/key[i]` for array elements.
pub trait PayloadVisitor {
    fn visit_object(&mut self, _path: &str, _object: &mut Map<String, Value>) {}

    fn visit_string(&mut self, _path: &str, _value: &mut String) {}
}

/// Walk a whole payload, root object included.
pub fn walk(payload: &mut Map<String, Value>, visitor: &mut dyn PayloadVisitor) {
    walk_object(payload, "", visitor);
}

/// Walk an arbitrary value.
pub fn walk_value(value: &mut Value, visitor: &mut dyn PayloadVisitor) {
    walk_at(value, "", visitor);
}

fn walk_at(value: &mut Value, path: &str, visitor: &mut dyn PayloadVisitor) {
    match value {
        Value::Object(object) => walk_object(object, path, visitor),
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk_at(item, &format!("{}[{}]", path, i), visitor);
            }
        }
        Value::String(text) => visitor.visit_string(parent_path(path), text),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn walk_object(object: &mut Map<String, Value>, path: &str, visitor: &mut dyn PayloadVisitor) {
    visitor.visit_object(if path.is_empty() { "/" } else { path }, object);

    for (key, value) in object.iter_mut() {
        walk_at(value, &format!("{}/{}", path, key), visitor);
    }
}

/// Strings report the path of the container holding them.
fn parent_path(path: &str) -> &str {
    if path.is_empty() {
        return "/";
    }
    match path.rfind(|c: char| c == '/' || c == '[') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Replaces every string equal to `from` with `to`.
pub struct ReplaceStrings<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub replaced: usize,
}

impl<'a> ReplaceStrings<'a> {
    pub fn new(from: &'a str, to: &'a str) -> Self {
        Self {
            from,
            to,
            replaced: 0,
        }
    }
}

impl PayloadVisitor for ReplaceStrings<'_> {
    fn visit_string(&mut self, _path: &str, value: &mut String) {
        if value == self.from {
            *value = self.to.to_string();
            self.replaced += 1;
        }
    }
}

/// True if any string anywhere in `value` equals `needle`.
pub fn contains_string(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|item| contains_string(item, needle)),
        Value::Object(object) => object.values().any(|item| contains_string(item, needle)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Collect {
        objects: Vec<String>,
        strings: Vec<(String, String)>,
    }

    impl PayloadVisitor for Collect {
        fn visit_object(&mut self, path: &str, _object: &mut Map<String, Value>) {
            self.objects.push(path.to_string());
        }

        fn visit_string(&mut self, path: &str, value: &mut String) {
            self.strings.push((path.to_string(), value.clone()));
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn object_paths() {
        let mut payload = object(json!({
            "author": {"__related_node__": "a"},
            "authors": [{"name": "x"}, [{"deep": true}]],
            "title": "t"
        }));
        let mut collect = Collect::default();
        walk(&mut payload, &mut collect);

        assert_eq!(
            collect.objects,
            ["/", "/author", "/authors[0]", "/authors[1][0]"]
        );
    }

    #[test]
    fn strings_report_container_path() {
        let mut payload = object(json!({"title": "t", "nested": {"tags": ["a"]}}));
        let mut collect = Collect::default();
        walk(&mut payload, &mut collect);

        assert!(collect.strings.contains(&("/".to_string(), "t".to_string())));
        assert!(collect
            .strings
            .contains(&("/nested/tags".to_string(), "a".to_string())));
    }

    #[test]
    fn replace_strings_everywhere() {
        let mut payload = object(json!({
            "a": "alias-1",
            "b": ["alias-1", {"c": "alias-1", "d": "alias-10"}],
            "e": 1
        }));
        let mut replace = ReplaceStrings::new("alias-1", "final");
        walk(&mut payload, &mut replace);

        assert_eq!(replace.replaced, 3);
        let value = Value::Object(payload);
        assert!(!contains_string(&value, "alias-1"));
        assert!(contains_string(&value, "alias-10"));
    }

    #[test]
    fn walk_value_handles_scalars() {
        let mut value = json!("alias-1");
        let mut replace = ReplaceStrings::new("alias-1", "final");
        walk_value(&mut value, &mut replace);
        assert_eq!(value, json!("final"));
    }
}
