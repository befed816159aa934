//! Cypher statements for GraphLoom operations.
//!
//! Labels, relationship types and index names cannot be bound as parameters
//! in Cypher; the `${...}` placeholders are interpolated after validation by
//! the sanitizers in [`crate::utils`]. Everything else is parameterized.

/// One uniqueness constraint covers every KB: a node key is unique per
/// `(kb_id, key)` across all labels.
pub const CREATE_KEY_CONSTRAINT: &str = r#"
CREATE CONSTRAINT graphloom_node_key IF NOT EXISTS
FOR (n) REQUIRE (n.kb_id, n.key) IS UNIQUE
"#;

/// Vector index over node embeddings, one per KB
pub const CREATE_VECTOR_INDEX: &str = r#"
CREATE VECTOR INDEX ${index_name} IF NOT EXISTS
FOR (n) ON (n.embedding)
OPTIONS {indexConfig: {`vector.dimensions`: ${dim}, `vector.similarity_function`: 'cosine'}}
"#;

/// Adapter-internal metadata node recording a KB's vector dimension
pub const UPSERT_KB_META: &str = r#"
MERGE (m:KbMeta {kb_id: $kb_id})
ON CREATE SET m.vector_dim = $dim, m.created_at = datetime()
RETURN m.vector_dim AS vector_dim
"#;

/// Read a KB's recorded vector dimension
pub const GET_KB_META_DIM: &str = r#"
MATCH (m:KbMeta {kb_id: $kb_id})
RETURN m.vector_dim AS vector_dim
"#;

/// Merge one node by `(kb_id, label, key)` with provenance overwrite.
/// The transient `__new` flag distinguishes created from matched.
pub const MERGE_NODE: &str = r#"
MERGE (n:${label} {kb_id: $kb_id, key: $key})
ON CREATE SET n.__new = true
SET n += $props,
    n.source_id = $source_id,
    n.run_id = $run_id,
    n.updated_at = datetime($updated_at)
WITH n, coalesce(n.__new, false) AS created
REMOVE n.__new
RETURN created
"#;

/// Merge one relationship between two existing nodes with provenance
/// overwrite. Missing endpoints make the whole statement a no-op.
pub const MERGE_EDGE: &str = r#"
MATCH (f:${from_label} {kb_id: $kb_id, key: $from_key})
MATCH (t:${to_label} {kb_id: $kb_id, key: $to_key})
MERGE (f)-[r:${rel_type}]->(t)
ON CREATE SET r.__new = true
SET r += $props,
    r.kb_id = $kb_id,
    r.source_id = $source_id,
    r.run_id = $run_id,
    r.updated_at = datetime($updated_at)
WITH r, coalesce(r.__new, false) AS created
REMOVE r.__new
RETURN created
"#;

/// ANN query against a KB's vector index; property filters are applied by
/// the adapter after the index returns its candidates.
pub const VECTOR_QUERY: &str = r#"
CALL db.index.vector.queryNodes($index_name, $k, $embedding)
YIELD node, score
WHERE node.kb_id = $kb_id
RETURN node, labels(node) AS labels, score
ORDER BY score DESC
"#;

/// Count nodes of a KB (metadata excluded)
pub const COUNT_NODES: &str = r#"
MATCH (n {kb_id: $kb_id})
WHERE NOT n:KbMeta
RETURN count(n) AS node_count
"#;

/// Count relationships of a KB
pub const COUNT_RELATIONSHIPS: &str = r#"
MATCH ()-[r {kb_id: $kb_id}]->()
RETURN count(r) AS relationship_count
"#;
