//! Mapping engine: projects one document through one source mapping into
//! ordered node and edge records.
//!
//! `apply_mapping` is a pure function of `(document, mapping, schema)`.
//! Emission order is part of the contract: primary node first, then secondary
//! nodes in edge declaration order, then edges in edge declaration order, so
//! downstream merges are deterministic under replay.

use crate::errors::MappingError;
use crate::schema::{KbSchema, SourceMapping};
use crate::types::{EdgeRecord, NodeRecord, NodeRef};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// The records one document projects to
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDocument {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

/// Coerce a scalar into a key string. Strings must be non-empty; numbers
/// stringify; anything else is not a usable key.
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Apply one mapping to one document.
///
/// Failures are per-document: the caller records them on the run and skips
/// the document; they never abort the run.
pub fn apply_mapping(
    doc: &Value,
    mapping: &SourceMapping,
    schema: &KbSchema,
) -> Result<MappedDocument, MappingError> {
    if !doc.is_object() {
        return Err(MappingError::NotAnObject);
    }

    // Primary node
    let extract = &mapping.extract;
    let mut props = Map::new();
    for (prop, path) in &extract.assign {
        if let Some(value) = path.evaluate(doc).first() {
            props.insert(prop.clone(), (*value).clone());
        }
    }

    let key_prop = schema
        .node_spec(&extract.node)
        .map(|spec| spec.key.clone())
        .ok_or_else(|| MappingError::MissingKey {
            label: extract.node.clone(),
            path: "<undeclared label>".to_string(),
        })?;
    let key_path = extract
        .assign
        .iter()
        .find(|(prop, _)| *prop == key_prop)
        .map(|(_, path)| path)
        .ok_or_else(|| MappingError::MissingKey {
            label: extract.node.clone(),
            path: format!("$.{}", key_prop),
        })?;

    let key = match key_path.first_scalar(doc) {
        None => {
            return Err(MappingError::MissingKey {
                label: extract.node.clone(),
                path: key_path.as_str().to_string(),
            })
        }
        Some(scalar) => key_string(&scalar).ok_or_else(|| MappingError::KeyNotScalar {
            label: extract.node.clone(),
            path: key_path.as_str().to_string(),
        })?,
    };

    let primary = NodeRecord::new(extract.node.clone(), key.clone()).with_props(props);

    let mut nodes = vec![primary];
    let mut seen_nodes: HashSet<(String, String)> = HashSet::new();
    seen_nodes.insert((extract.node.clone(), key));
    let mut edges = Vec::new();

    // Edges and their secondary nodes
    for edge in &mapping.edges {
        let from_key = match edge.from.key.first_scalar(doc).as_ref().and_then(key_string) {
            Some(k) => k,
            // Unresolvable endpoint: skip this edge, not the document
            None => continue,
        };

        // Full target list, order-preserving, deduplicated on first occurrence
        let raw_targets: Vec<Value> = edge.to.key.evaluate(doc).into_iter().cloned().collect();
        let mut to_keys: Vec<(String, usize)> = Vec::new();
        let mut seen_targets = HashSet::new();
        for (i, value) in raw_targets.iter().enumerate() {
            if let Some(k) = key_string(value) {
                if seen_targets.insert(k.clone()) {
                    to_keys.push((k, i));
                }
            }
        }

        let declared_key = schema.node_spec(&edge.to.node).map(|s| s.key.clone());

        // Evaluate secondary-node property paths once; lists that fan out in
        // lockstep with the target list align positionally, everything else
        // contributes its first value.
        let prop_lists: Vec<(String, Vec<Value>)> = edge
            .to
            .props
            .iter()
            .map(|(prop, path)| {
                let values = path.evaluate(doc).into_iter().cloned().collect();
                (prop.clone(), values)
            })
            .collect();

        for (to_key, position) in &to_keys {
            if !prop_lists.is_empty() {
                let mut target_props = Map::new();
                for (prop, values) in &prop_lists {
                    let value = if values.len() == raw_targets.len() {
                        values.get(*position)
                    } else {
                        values.first()
                    };
                    if let Some(value) = value {
                        target_props.insert(prop.clone(), value.clone());
                    }
                }

                if let Some(ref declared_key) = declared_key {
                    let key_matches = target_props
                        .get(declared_key)
                        .and_then(key_string)
                        .map_or(false, |k| k == *to_key);
                    let key_is_only_prop =
                        target_props.len() == 1 && target_props.contains_key(declared_key);

                    if key_matches || key_is_only_prop {
                        target_props
                            .insert(declared_key.clone(), Value::String(to_key.clone()));
                        if seen_nodes.insert((edge.to.node.clone(), to_key.clone())) {
                            nodes.push(
                                NodeRecord::new(edge.to.node.clone(), to_key.clone())
                                    .with_props(target_props),
                            );
                        }
                    }
                }
            }

            edges.push(EdgeRecord::new(
                edge.rel_type.clone(),
                NodeRef::new(edge.from.node.clone(), from_key.clone()),
                NodeRef::new(edge.to.node.clone(), to_key.clone()),
            ));
        }
    }

    Ok(MappedDocument { nodes, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use serde_json::json;

    fn article_schema() -> KbSchema {
        let yaml = r#"
kb_id: demo
embedding:
  provider: "ollama:mxbai-embed-large"
  chunking:
    strategy: paragraph
    max_tokens: 800
    overlap: 0
nodes:
  - label: Document
    key: id
    props: [id, title, content]
  - label: Person
    key: email
    props: [name, email]
relationships:
  - type: AUTHORED_BY
    from: Document
    to: Person
  - type: REVIEWED_BY
    from: Document
    to: Person
mappings:
  sources:
    - source_id: src1
      document_type: article
      extract:
        node: Document
        assign:
          id: "$.id"
          title: "$.title"
          content: "$.content"
      edges:
        - type: AUTHORED_BY
          from: { node: Document, key: "$.id" }
          to:
            node: Person
            key: "$.author.email"
            props:
              email: "$.author.email"
              name: "$.author.name"
        - type: REVIEWED_BY
          from: { node: Document, key: "$.id" }
          to:
            node: Person
            key: "$.reviewers[*].email"
            props:
              email: "$.reviewers[*].email"
              name: "$.reviewers[*].name"
"#;
        compile(yaml).expect("test schema").0
    }

    fn article() -> Value {
        json!({
            "id": "d1",
            "title": "T1",
            "content": "C1",
            "author": {"name": "A", "email": "a@x"},
            "reviewers": [
                {"name": "B", "email": "b@x"},
                {"name": "C", "email": "c@x"},
                {"name": "B again", "email": "b@x"}
            ]
        })
    }

    #[test]
    fn test_primary_and_secondary_extraction() {
        let schema = article_schema();
        let mapped = apply_mapping(&article(), &schema.mappings[0], &schema).unwrap();

        // Primary first, then secondary nodes in edge declaration order
        assert_eq!(mapped.nodes[0].label, "Document");
        assert_eq!(mapped.nodes[0].key, "d1");
        assert_eq!(mapped.nodes[0].props.get("title"), Some(&json!("T1")));

        let people: Vec<&str> = mapped.nodes[1..].iter().map(|n| n.key.as_str()).collect();
        assert_eq!(people, vec!["a@x", "b@x", "c@x"]);
        assert_eq!(mapped.nodes[2].props.get("name"), Some(&json!("B")));
        assert_eq!(mapped.nodes[3].props.get("name"), Some(&json!("C")));
    }

    #[test]
    fn test_edge_fan_out_dedups_targets() {
        let schema = article_schema();
        let mapped = apply_mapping(&article(), &schema.mappings[0], &schema).unwrap();

        let reviewed: Vec<&str> = mapped
            .edges
            .iter()
            .filter(|e| e.rel_type == "REVIEWED_BY")
            .map(|e| e.to.key.as_str())
            .collect();
        // b@x appears twice in the document but fans out once
        assert_eq!(reviewed, vec!["b@x", "c@x"]);
        assert_eq!(mapped.edges.len(), 3);
        assert_eq!(mapped.edges[0].rel_type, "AUTHORED_BY");
        assert!(mapped.edges.iter().all(|e| e.from.key == "d1"));
    }

    #[test]
    fn test_missing_primary_key_fails_document() {
        let schema = article_schema();
        let doc = json!({"title": "no id", "author": {"email": "a@x"}});
        let err = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap_err();
        assert!(matches!(err, MappingError::MissingKey { ref label, .. } if label == "Document"));
    }

    #[test]
    fn test_non_scalar_key_fails_document() {
        let schema = article_schema();
        let doc = json!({"id": true, "title": "T"});
        let err = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap_err();
        assert!(matches!(err, MappingError::KeyNotScalar { .. }));
    }

    #[test]
    fn test_numeric_keys_coerce() {
        let schema = article_schema();
        let doc = json!({"id": 42, "title": "T"});
        let mapped = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap();
        assert_eq!(mapped.nodes[0].key, "42");
    }

    #[test]
    fn test_missing_edge_endpoint_skips_edge() {
        let schema = article_schema();
        let doc = json!({"id": "d1", "title": "T"});
        let mapped = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap();
        assert_eq!(mapped.nodes.len(), 1);
        assert!(mapped.edges.is_empty());
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let schema = article_schema();
        let doc = article();
        let first = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap();
        let second = apply_mapping(&doc, &schema.mappings[0], &schema).unwrap();
        assert_eq!(first, second);

        let a = serde_json::to_string(&first.nodes).unwrap();
        let b = serde_json::to_string(&second.nodes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_document_must_be_object() {
        let schema = article_schema();
        let err = apply_mapping(&json!([1, 2]), &schema.mappings[0], &schema).unwrap_err();
        assert_eq!(err, MappingError::NotAnObject);
    }
}
