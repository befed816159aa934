//! Utility functions for Neo4j operations

use graphloom_core::errors::GraphError;

/// Validate a label before interpolating it into Cypher. Labels come from a
/// validated schema, so a failure here means a caller bypassed validation.
pub fn sanitize_label(label: &str) -> Result<&str, GraphError> {
    let mut chars = label.chars();
    let head_ok = chars.next().map_or(false, |c| c.is_ascii_uppercase());
    if head_ok && label.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Ok(label)
    } else {
        Err(GraphError::QueryFailed(format!("invalid label name: {}", label)))
    }
}

/// Validate a relationship type before interpolating it into Cypher
pub fn sanitize_rel_type(rel_type: &str) -> Result<&str, GraphError> {
    let valid = !rel_type.is_empty()
        && rel_type
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(rel_type)
    } else {
        Err(GraphError::QueryFailed(format!(
            "invalid relationship type: {}",
            rel_type
        )))
    }
}

/// Validate a vector index name before interpolating it into Cypher
pub fn sanitize_index_name(name: &str) -> Result<&str, GraphError> {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(GraphError::QueryFailed(format!("invalid index name: {}", name)))
    }
}

/// Extract the projection aliases of a read query's final RETURN clause, so
/// result rows can be pulled column by column.
///
/// `RETURN n.title AS title, score` yields `["title", "score"]`; an aliased
/// projection is required for expressions that are not a bare identifier or
/// property access. `RETURN *` is rejected.
pub fn return_aliases(query: &str) -> Result<Vec<String>, GraphError> {
    let lowered = query.to_lowercase();
    let return_at = lowered
        .rfind("return")
        .ok_or_else(|| GraphError::QueryFailed("query has no RETURN clause".to_string()))?;
    let mut clause = &query[return_at + "return".len()..];

    // Trailing modifiers do not contribute projections
    for terminator in ["order by", "limit", "skip"] {
        if let Some(at) = clause.to_lowercase().find(terminator) {
            clause = &clause[..at];
        }
    }

    if clause.trim() == "*" {
        return Err(GraphError::QueryFailed(
            "RETURN * is not supported; project named columns".to_string(),
        ));
    }

    let mut aliases = Vec::new();
    for projection in split_top_level(clause) {
        let projection = projection.trim();
        if projection.is_empty() {
            continue;
        }
        let lowered = projection.to_lowercase();
        let alias = if let Some(at) = lowered.rfind(" as ") {
            projection[at + 4..].trim().to_string()
        } else {
            projection.to_string()
        };
        aliases.push(alias);
    }

    if aliases.is_empty() {
        return Err(GraphError::QueryFailed(
            "RETURN clause has no projections".to_string(),
        ));
    }
    Ok(aliases)
}

/// Split a projection list on commas that are not nested in (), [] or {}
fn split_top_level(clause: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in clause.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&clause[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&clause[start..]);
    parts
}
