//! Schema validation.
//!
//! Four layers, all of which run and accumulate findings: structural,
//! cross-reference, path syntax, and advisories. Only the first three can
//! fail a schema; advisories surface as warnings.

use super::{
    ChunkStrategy, ChunkingSpec, EdgeRule, EmbeddingSpec, EndpointRule, ExtractRule, KbSchema,
    NodeSpec, RawChunking, RawEdgeRule, RawSchema, RawSourceMapping, RelationshipSpec,
    SourceMapping, TargetRule,
};
use crate::embedding::ProviderRef;
use crate::errors::{ValidationIssue, ValidationReport};
use crate::path::PathExpr;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;

static KB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
static SOURCE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_]*$").unwrap());
static REL_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap());
static PROVIDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(ollama|openai):[A-Za-z0-9_-]+$").unwrap());
static PATH_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\..*").unwrap());

/// Property-name substrings that trigger the PII advisory
const PII_DENYLIST: &[&str] = &[
    "password",
    "ssn",
    "social_security",
    "credit_card",
    "bank_account",
    "api_key",
    "secret",
];

const MAX_TOKENS_RANGE: std::ops::RangeInclusive<i64> = 100..=8000;
const OVERLAP_RANGE: std::ops::RangeInclusive<i64> = 0..=500;

/// Parse and validate a YAML schema document.
///
/// Returns the compiled schema plus any advisory warnings, or the full
/// accumulated report when any of layers 1-3 found an error. Never panics,
/// whatever the input.
pub fn compile(yaml: &str) -> Result<(KbSchema, Vec<ValidationIssue>), ValidationReport> {
    let raw: RawSchema = match serde_yaml::from_str(yaml) {
        Ok(raw) => raw,
        Err(e) => {
            let mut report = ValidationReport::default();
            report.error(ValidationIssue::new(
                "schema",
                format!("not a valid schema document: {}", e),
            ));
            return Err(report);
        }
    };

    let mut report = ValidationReport::default();
    structural(&raw, &mut report);
    cross_reference(&raw, &mut report);
    path_syntax(&raw, &mut report);
    advisories(&raw, &mut report);

    if !report.is_ok() {
        return Err(report);
    }

    match build(&raw) {
        Ok(schema) => Ok((schema, report.warnings)),
        Err(issue) => {
            report.error(issue);
            Err(report)
        }
    }
}

// ---------------------------------------------------------------------------
// Layer 1: structural
// ---------------------------------------------------------------------------

fn structural(raw: &RawSchema, report: &mut ValidationReport) {
    match raw.kb_id.as_deref() {
        None => report.error(ValidationIssue::new("kb_id", "required field is missing")),
        Some(id) if !KB_ID_RE.is_match(id) => report.error(ValidationIssue::new(
            "kb_id",
            format!("'{}' must match [A-Za-z0-9_-]{{1,64}}", id),
        )),
        Some(_) => {}
    }

    match &raw.embedding {
        None => report.error(ValidationIssue::new("embedding", "required field is missing")),
        Some(embedding) => {
            match embedding.provider.as_deref() {
                None => report.error(ValidationIssue::new(
                    "embedding.provider",
                    "required field is missing",
                )),
                Some(provider) if !PROVIDER_RE.is_match(provider) => {
                    report.error(ValidationIssue::new(
                        "embedding.provider",
                        format!("'{}' must be '<ollama|openai>:<model>'", provider),
                    ))
                }
                Some(_) => {}
            }
            match &embedding.chunking {
                None => report.error(ValidationIssue::new(
                    "embedding.chunking",
                    "required field is missing",
                )),
                Some(chunking) => structural_chunking(chunking, report),
            }
        }
    }

    if raw.nodes.is_empty() {
        report.error(ValidationIssue::new("nodes", "at least one node is required"));
    }
    let mut seen_labels = HashSet::new();
    for (i, node) in raw.nodes.iter().enumerate() {
        let field = format!("nodes[{}]", i);
        match node.label.as_deref() {
            None => report.error(ValidationIssue::new(
                format!("{}.label", field),
                "required field is missing",
            )),
            Some(label) if !LABEL_RE.is_match(label) => report.error(ValidationIssue::new(
                format!("{}.label", field),
                format!("'{}' must be a capitalized identifier", label),
            )),
            Some(label) => {
                if !seen_labels.insert(label) {
                    report.error(ValidationIssue::new(
                        format!("{}.label", field),
                        format!("duplicate node label '{}'", label),
                    ));
                }
            }
        }
        match node.key.as_deref() {
            None | Some("") => report.error(ValidationIssue::new(
                format!("{}.key", field),
                "required field is missing",
            )),
            Some(_) => {}
        }
    }

    for (i, rel) in raw.relationships.iter().enumerate() {
        let field = format!("relationships[{}]", i);
        match rel.rel_type.as_deref() {
            None => report.error(ValidationIssue::new(
                format!("{}.type", field),
                "required field is missing",
            )),
            Some(t) if !REL_TYPE_RE.is_match(t) => report.error(ValidationIssue::new(
                format!("{}.type", field),
                format!("'{}' must be UPPER_SNAKE", t),
            )),
            Some(_) => {}
        }
        for (end, value) in [("from", &rel.from), ("to", &rel.to)] {
            if value.is_none() {
                report.error(ValidationIssue::new(
                    format!("{}.{}", field, end),
                    "required field is missing",
                ));
            }
        }
    }

    for (i, mapping) in raw.mappings.sources.iter().enumerate() {
        structural_mapping(i, mapping, report);
    }
}

fn structural_chunking(chunking: &RawChunking, report: &mut ValidationReport) {
    let strategy = match chunking.strategy.as_deref() {
        None => {
            report.error(ValidationIssue::new(
                "embedding.chunking.strategy",
                "required field is missing",
            ));
            None
        }
        Some(s) => match s.parse::<ChunkStrategy>() {
            Ok(strategy) => Some(strategy),
            Err(message) => {
                report.error(ValidationIssue::new("embedding.chunking.strategy", message));
                None
            }
        },
    };

    match chunking.max_tokens {
        None => report.error(ValidationIssue::new(
            "embedding.chunking.max_tokens",
            "required field is missing",
        )),
        Some(n) if !MAX_TOKENS_RANGE.contains(&n) => report.error(ValidationIssue::new(
            "embedding.chunking.max_tokens",
            format!("{} is outside [100, 8000]", n),
        )),
        Some(_) => {}
    }

    if let Some(overlap) = chunking.overlap {
        if !OVERLAP_RANGE.contains(&overlap) {
            report.error(ValidationIssue::new(
                "embedding.chunking.overlap",
                format!("{} is outside [0, 500]", overlap),
            ));
        }
    }

    if strategy == Some(ChunkStrategy::ByFields)
        && chunking.fields.as_ref().map_or(true, |f| f.is_empty())
    {
        report.error(ValidationIssue::new(
            "embedding.chunking.fields",
            "strategy 'by_fields' requires a non-empty field list",
        ));
    }
}

fn structural_mapping(i: usize, mapping: &RawSourceMapping, report: &mut ValidationReport) {
    let base = format!("mappings.sources[{}]", i);
    match mapping.source_id.as_deref() {
        None => report.error(ValidationIssue::new(
            format!("{}.source_id", base),
            "required field is missing",
        )),
        Some(id) if !SOURCE_ID_RE.is_match(id) => report.error(ValidationIssue::new(
            format!("{}.source_id", base),
            format!("'{}' must match [A-Za-z0-9_-]+", id),
        )),
        Some(_) => {}
    }
    if mapping.document_type.is_none() {
        report.error(ValidationIssue::new(
            format!("{}.document_type", base),
            "required field is missing",
        ));
    }
    match &mapping.extract {
        None => report.error(ValidationIssue::new(
            format!("{}.extract", base),
            "required field is missing",
        )),
        Some(extract) => {
            if extract.node.is_none() {
                report.error(ValidationIssue::new(
                    format!("{}.extract.node", base),
                    "required field is missing",
                ));
            }
            if extract.assign.is_empty() {
                report.error(ValidationIssue::new(
                    format!("{}.extract.assign", base),
                    "at least one assignment is required",
                ));
            }
            for (prop, path) in &extract.assign {
                if !PATH_PREFIX_RE.is_match(path) {
                    report.error(ValidationIssue::new(
                        format!("{}.extract.assign.{}", base, prop),
                        format!("'{}' must start with '$.'", path),
                    ));
                }
            }
        }
    }
    for (j, edge) in mapping.edges.iter().enumerate() {
        structural_edge(&base, j, edge, report);
    }
}

fn structural_edge(base: &str, j: usize, edge: &RawEdgeRule, report: &mut ValidationReport) {
    let field = format!("{}.edges[{}]", base, j);
    if edge.rel_type.is_none() {
        report.error(ValidationIssue::new(
            format!("{}.type", field),
            "required field is missing",
        ));
    }
    match &edge.from {
        None => report.error(ValidationIssue::new(
            format!("{}.from", field),
            "required field is missing",
        )),
        Some(from) => {
            if from.node.is_none() {
                report.error(ValidationIssue::new(
                    format!("{}.from.node", field),
                    "required field is missing",
                ));
            }
            match from.key.as_deref() {
                None => report.error(ValidationIssue::new(
                    format!("{}.from.key", field),
                    "required field is missing",
                )),
                Some(path) if !PATH_PREFIX_RE.is_match(path) => {
                    report.error(ValidationIssue::new(
                        format!("{}.from.key", field),
                        format!("'{}' must start with '$.'", path),
                    ))
                }
                Some(_) => {}
            }
        }
    }
    match &edge.to {
        None => report.error(ValidationIssue::new(
            format!("{}.to", field),
            "required field is missing",
        )),
        Some(to) => {
            if to.node.is_none() {
                report.error(ValidationIssue::new(
                    format!("{}.to.node", field),
                    "required field is missing",
                ));
            }
            match to.key.as_deref() {
                None => report.error(ValidationIssue::new(
                    format!("{}.to.key", field),
                    "required field is missing",
                )),
                Some(path) if !PATH_PREFIX_RE.is_match(path) => {
                    report.error(ValidationIssue::new(
                        format!("{}.to.key", field),
                        format!("'{}' must start with '$.'", path),
                    ))
                }
                Some(_) => {}
            }
            if let Some(props) = &to.props {
                for (prop, path) in props {
                    if !PATH_PREFIX_RE.is_match(path) {
                        report.error(ValidationIssue::new(
                            format!("{}.to.props.{}", field, prop),
                            format!("'{}' must start with '$.'", path),
                        ));
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Layer 2: cross-reference
// ---------------------------------------------------------------------------

fn cross_reference(raw: &RawSchema, report: &mut ValidationReport) {
    let labels: Vec<&str> = raw.nodes.iter().filter_map(|n| n.label.as_deref()).collect();
    let rel_types: Vec<&str> = raw
        .relationships
        .iter()
        .filter_map(|r| r.rel_type.as_deref())
        .collect();

    let check_label = |report: &mut ValidationReport, field: String, label: &str| {
        if !labels.contains(&label) {
            let mut issue = ValidationIssue::new(
                field,
                format!("unknown node label '{}': not declared in nodes", label),
            );
            if let Some(candidate) = closest(label, labels.iter().copied()) {
                issue = issue.with_suggestion(candidate);
            }
            report.error(issue);
        }
    };

    for (i, rel) in raw.relationships.iter().enumerate() {
        if let Some(from) = rel.from.as_deref() {
            check_label(report, format!("relationships[{}].from", i), from);
        }
        if let Some(to) = rel.to.as_deref() {
            check_label(report, format!("relationships[{}].to", i), to);
        }
    }

    for (i, mapping) in raw.mappings.sources.iter().enumerate() {
        let base = format!("mappings.sources[{}]", i);
        if let Some(extract) = &mapping.extract {
            if let Some(node) = extract.node.as_deref() {
                check_label(report, format!("{}.extract.node", base), node);

                // The extracted node's key property must be populated
                if let Some(spec) = raw.nodes.iter().find(|n| n.label.as_deref() == Some(node)) {
                    if let Some(key) = spec.key.as_deref() {
                        if !extract.assign.contains_key(key) {
                            report.error(ValidationIssue::new(
                                format!("{}.extract.assign", base),
                                format!(
                                    "key property '{}' of node '{}' is not assigned",
                                    key, node
                                ),
                            ));
                        }
                    }
                }
            }
        }
        for (j, edge) in mapping.edges.iter().enumerate() {
            let field = format!("{}.edges[{}]", base, j);
            if let Some(rel_type) = edge.rel_type.as_deref() {
                if !rel_types.contains(&rel_type) {
                    let mut issue = ValidationIssue::new(
                        format!("{}.type", field),
                        format!(
                            "unknown relationship type '{}': not declared in relationships",
                            rel_type
                        ),
                    );
                    if let Some(candidate) = closest(rel_type, rel_types.iter().copied()) {
                        issue = issue.with_suggestion(candidate);
                    }
                    report.error(issue);
                }
            }
            if let Some(node) = edge.from.as_ref().and_then(|f| f.node.as_deref()) {
                check_label(report, format!("{}.from.node", field), node);
            }
            if let Some(node) = edge.to.as_ref().and_then(|t| t.node.as_deref()) {
                check_label(report, format!("{}.to.node", field), node);
            }
        }
    }
}

/// Closest candidate by Jaro-Winkler similarity, if any scores >= 0.7
fn closest<'a>(target: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    candidates
        .map(|c| (strsim::jaro_winkler(&target.to_lowercase(), &c.to_lowercase()), c))
        .filter(|(score, _)| *score >= 0.7)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, c)| c.to_string())
}

// ---------------------------------------------------------------------------
// Layer 3: path syntax
// ---------------------------------------------------------------------------

fn path_syntax(raw: &RawSchema, report: &mut ValidationReport) {
    let probe = json!({});
    let mut check = |field: String, path: &str| match PathExpr::parse(path) {
        Ok(expr) => {
            // Empty-document probe: evaluation must be total
            let _ = expr.evaluate(&probe);
        }
        Err(e) => report.error(ValidationIssue::new(field, e.reason)),
    };

    for (i, mapping) in raw.mappings.sources.iter().enumerate() {
        let base = format!("mappings.sources[{}]", i);
        if let Some(extract) = &mapping.extract {
            for (prop, path) in &extract.assign {
                check(format!("{}.extract.assign.{}", base, prop), path);
            }
        }
        for (j, edge) in mapping.edges.iter().enumerate() {
            let field = format!("{}.edges[{}]", base, j);
            if let Some(path) = edge.from.as_ref().and_then(|f| f.key.as_deref()) {
                check(format!("{}.from.key", field), path);
            }
            if let Some(to) = &edge.to {
                if let Some(path) = to.key.as_deref() {
                    check(format!("{}.to.key", field), path);
                }
                if let Some(props) = &to.props {
                    for (prop, path) in props {
                        check(format!("{}.to.props.{}", field, prop), path);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Layer 4: advisories
// ---------------------------------------------------------------------------

fn advisories(raw: &RawSchema, report: &mut ValidationReport) {
    for (i, node) in raw.nodes.iter().enumerate() {
        let key = node.key.as_deref().unwrap_or_default();
        for prop in &node.props {
            let lowered = prop.to_lowercase();
            if let Some(hit) = PII_DENYLIST.iter().find(|term| lowered.contains(*term)) {
                report.warn(ValidationIssue::new(
                    format!("nodes[{}].props", i),
                    format!("property '{}' matches sensitive-data denylist ('{}')", prop, hit),
                ));
            }
            if lowered.contains("email") && prop != key {
                report.warn(ValidationIssue::new(
                    format!("nodes[{}].props", i),
                    format!(
                        "property '{}' looks like an identity but is not the node key; \
                         entity resolution may produce duplicates",
                        prop
                    ),
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw -> typed
// ---------------------------------------------------------------------------

fn build(raw: &RawSchema) -> Result<KbSchema, ValidationIssue> {
    let embedding = raw
        .embedding
        .as_ref()
        .ok_or_else(|| ValidationIssue::new("embedding", "required field is missing"))?;
    let chunking = embedding
        .chunking
        .as_ref()
        .ok_or_else(|| ValidationIssue::new("embedding.chunking", "required field is missing"))?;

    let provider: ProviderRef = embedding
        .provider
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: crate::errors::EmbedError| {
            ValidationIssue::new("embedding.provider", e.to_string())
        })?;

    let strategy = chunking
        .strategy
        .as_deref()
        .unwrap_or_default()
        .parse::<ChunkStrategy>()
        .map_err(|e| ValidationIssue::new("embedding.chunking.strategy", e))?;

    let compile_path = |field: &str, path: &str| -> Result<PathExpr, ValidationIssue> {
        PathExpr::parse(path).map_err(|e| ValidationIssue::new(field.to_string(), e.reason))
    };

    let mut mappings = Vec::with_capacity(raw.mappings.sources.len());
    for (i, m) in raw.mappings.sources.iter().enumerate() {
        let base = format!("mappings.sources[{}]", i);
        let extract = m
            .extract
            .as_ref()
            .ok_or_else(|| ValidationIssue::new(format!("{}.extract", base), "missing"))?;

        let mut assign = Vec::with_capacity(extract.assign.len());
        for (prop, path) in &extract.assign {
            let expr = compile_path(&format!("{}.extract.assign.{}", base, prop), path)?;
            assign.push((prop.clone(), expr));
        }

        let mut edges = Vec::with_capacity(m.edges.len());
        for (j, e) in m.edges.iter().enumerate() {
            let field = format!("{}.edges[{}]", base, j);
            let from = e
                .from
                .as_ref()
                .ok_or_else(|| ValidationIssue::new(format!("{}.from", field), "missing"))?;
            let to = e
                .to
                .as_ref()
                .ok_or_else(|| ValidationIssue::new(format!("{}.to", field), "missing"))?;

            let mut target_props = Vec::new();
            if let Some(props) = &to.props {
                for (prop, path) in props {
                    let expr = compile_path(&format!("{}.to.props.{}", field, prop), path)?;
                    target_props.push((prop.clone(), expr));
                }
            }

            edges.push(EdgeRule {
                rel_type: e.rel_type.clone().unwrap_or_default(),
                from: EndpointRule {
                    node: from.node.clone().unwrap_or_default(),
                    key: compile_path(
                        &format!("{}.from.key", field),
                        from.key.as_deref().unwrap_or_default(),
                    )?,
                },
                to: TargetRule {
                    node: to.node.clone().unwrap_or_default(),
                    key: compile_path(
                        &format!("{}.to.key", field),
                        to.key.as_deref().unwrap_or_default(),
                    )?,
                    props: target_props,
                },
            });
        }

        mappings.push(SourceMapping {
            source_id: m.source_id.clone().unwrap_or_default(),
            document_type: m.document_type.clone().unwrap_or_default(),
            extract: ExtractRule {
                node: extract.node.clone().unwrap_or_default(),
                assign,
            },
            edges,
        });
    }

    Ok(KbSchema {
        kb_id: raw.kb_id.clone().unwrap_or_default(),
        embedding: EmbeddingSpec {
            provider,
            chunking: ChunkingSpec {
                strategy,
                max_tokens: chunking.max_tokens.unwrap_or_default() as u32,
                overlap: chunking.overlap.unwrap_or(0) as u32,
                fields: chunking.fields.clone().unwrap_or_default(),
            },
        },
        nodes: raw
            .nodes
            .iter()
            .map(|n| NodeSpec {
                label: n.label.clone().unwrap_or_default(),
                key: n.key.clone().unwrap_or_default(),
                props: n.props.clone(),
            })
            .collect(),
        relationships: raw
            .relationships
            .iter()
            .map(|r| RelationshipSpec {
                rel_type: r.rel_type.clone().unwrap_or_default(),
                from: r.from.clone().unwrap_or_default(),
                to: r.to.clone().unwrap_or_default(),
                props: r.props.clone(),
            })
            .collect(),
        mappings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            r#"
kb_id: demo
embedding:
  provider: "ollama:mxbai-embed-large"
  chunking:
    strategy: paragraph
    max_tokens: 800
    overlap: 40
nodes:
  - label: Document
    key: id
    props: [id, title]
{}
"#,
            extra
        )
    }

    #[test]
    fn test_validation_is_total() {
        // Garbage inputs must produce a report, never a panic
        for input in ["", ":", "nodes: 7", "[1, 2, 3]", "kb_id: {a: b}", "\u{0}"] {
            match compile(input) {
                Ok(_) => panic!("garbage input compiled: {:?}", input),
                Err(report) => assert!(!report.errors.is_empty()),
            }
        }
    }

    #[test]
    fn test_structural_errors_accumulate() {
        let yaml = r#"
kb_id: "bad id!"
embedding:
  provider: "anthropic:claude"
  chunking:
    strategy: by_sentence
    max_tokens: 50
    overlap: 900
nodes:
  - label: lowercase
    key: id
"#;
        let report = compile(yaml).unwrap_err();
        let fields: Vec<_> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"kb_id"));
        assert!(fields.contains(&"embedding.provider"));
        assert!(fields.contains(&"embedding.chunking.strategy"));
        assert!(fields.contains(&"embedding.chunking.max_tokens"));
        assert!(fields.contains(&"embedding.chunking.overlap"));
        assert!(fields.contains(&"nodes[0].label"));
    }

    #[test]
    fn test_unknown_label_suggests_closest() {
        let yaml = minimal(
            r#"relationships:
  - type: AUTHORED_BY
    from: Doc
    to: Document
"#,
        );
        let report = compile(&yaml).unwrap_err();
        let issue = report
            .errors
            .iter()
            .find(|e| e.field == "relationships[0].from")
            .expect("missing cross-reference error");
        assert!(issue.message.contains("Doc"));
        assert_eq!(issue.suggestion.as_deref(), Some("Document"));
    }

    #[test]
    fn test_unassigned_key_is_an_error() {
        let yaml = minimal(
            r#"mappings:
  sources:
    - source_id: src1
      document_type: article
      extract:
        node: Document
        assign:
          title: "$.title"
"#,
        );
        let report = compile(&yaml).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("key property 'id'")));
    }

    #[test]
    fn test_bad_path_reported_per_field() {
        let yaml = minimal(
            r#"mappings:
  sources:
    - source_id: src1
      document_type: article
      extract:
        node: Document
        assign:
          id: "$.id"
          title: "title"
"#,
        );
        let report = compile(&yaml).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.field == "mappings.sources[0].extract.assign.title"));
    }

    #[test]
    fn test_by_fields_requires_fields() {
        let yaml = r#"
kb_id: demo
embedding:
  provider: "openai:text-embedding-3-small"
  chunking:
    strategy: by_fields
    max_tokens: 800
nodes:
  - label: Document
    key: id
"#;
        let report = compile(yaml).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| e.field == "embedding.chunking.fields"));
    }

    #[test]
    fn test_pii_and_identity_advisories() {
        let yaml = minimal("").replace(
            "props: [id, title]",
            "props: [id, title, password_hash, contact_email]",
        );
        let (_, warnings) = compile(&yaml).expect("advisories must not fail the schema");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.message.contains("password_hash")));
        assert!(warnings.iter().any(|w| w.message.contains("contact_email")));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let yaml = minimal("").replace(
            "nodes:\n  - label: Document\n    key: id\n    props: [id, title]",
            "nodes:\n  - label: Document\n    key: id\n  - label: Document\n    key: id",
        );
        let report = compile(&yaml).unwrap_err();
        assert!(report.errors.iter().any(|e| e.message.contains("duplicate")));
    }
}
