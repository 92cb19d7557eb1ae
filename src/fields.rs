use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Fields that survive every include list unless excluded by name.
const ALWAYS_INCLUDED: [&str; 2] = ["id", "collection"];

/// Fields to include or exclude.
///
/// Names are top-level keys (`id`, `assets`) or dotted paths
/// (`properties.foo`).
#[derive(Clone, Default, Debug, PartialEq, Serialize)]
pub struct Fields {
    /// Fields to include.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Fields to exclude.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Fields {
    /// Creates a new field selection.
    ///
    /// Fails with [Error::ConflictingFieldSelection] if a field appears in
    /// both lists.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Fields> {
        if let Some(field) = include.iter().find(|field| exclude.contains(field)) {
            return Err(Error::ConflictingFieldSelection(field.clone()));
        }
        Ok(Fields { include, exclude })
    }

    /// Returns true if this selection leaves features untouched.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Projects a feature.
    pub fn apply(&self, feature: Map<String, Value>) -> Map<String, Value> {
        let mut feature = if self.include.is_empty() {
            feature
        } else {
            let mut projected = Map::new();
            let always = ALWAYS_INCLUDED
                .iter()
                .filter(|field| !self.exclude.iter().any(|e| e == *field))
                .copied();
            for path in always.chain(self.include.iter().map(String::as_str)) {
                copy_path(&feature, &mut projected, path);
            }
            projected
        };
        for path in &self.exclude {
            remove_path(&mut feature, path);
        }
        feature
    }
}

fn copy_path(from: &Map<String, Value>, to: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = from.get(path) {
                let _ = to.insert(path.to_string(), value.clone());
            }
        }
        Some((head, rest)) => {
            let Some(Value::Object(from)) = from.get(head) else {
                return;
            };
            let entry = to
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(to) = entry {
                copy_path(from, to, rest);
            }
        }
    }
}

fn remove_path(map: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            let _ = map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(map)) = map.get_mut(head) {
                remove_path(map, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Fields;
    use crate::Error;
    use serde_json::{json, Map, Value};

    fn feature() -> Map<String, Value> {
        json!({
            "type": "Feature",
            "id": "an-id",
            "collection": "collection-id",
            "geometry": null,
            "properties": {"foo": 42, "bar": 43},
            "assets": {},
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn fields(include: &[&str], exclude: &[&str]) -> Fields {
        Fields::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn include_id() {
        let feature = fields(&["id"], &[]).apply(feature());
        assert_eq!(
            Value::Object(feature),
            json!({"id": "an-id", "collection": "collection-id"})
        );
    }

    #[test]
    fn exclude_id() {
        let original = feature();
        let feature = fields(&[], &["id"]).apply(original.clone());
        assert!(!feature.contains_key("id"));
        assert_eq!(feature.len(), original.len() - 1);
    }

    #[test]
    fn include_nested() {
        let feature = fields(&["properties.foo"], &["properties.bar"]).apply(feature());
        assert_eq!(feature["properties"], json!({"foo": 42}));
        assert_eq!(feature["id"], "an-id");
    }

    #[test]
    fn include_excluding_collection() {
        let feature = fields(&["id"], &["collection"]).apply(feature());
        assert_eq!(Value::Object(feature), json!({"id": "an-id"}));
    }

    #[test]
    fn conflict() {
        let err = Fields::new(vec!["id".into()], vec!["id".into()]).unwrap_err();
        assert!(matches!(err, Error::ConflictingFieldSelection(field) if field == "id"));
    }

    #[test]
    fn empty() {
        assert!(Fields::default().is_empty());
        assert_eq!(Fields::default().apply(feature()), feature());
    }
}
