//! Error types for GraphLoom core operations

use crate::types::{KbId, RunId, SourceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One finding produced by schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted location of the offending field (e.g. "relationships[0].from")
    pub field: String,
    pub message: String,
    /// Closest-candidate hint, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " (did you mean '{}'?)", suggestion)?;
        }
        Ok(())
    }
}

/// Accumulated outcome of all schema validation layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    pub fn warn(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// Fold another report's findings into this one
    pub fn absorb(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        for issue in &self.errors {
            write!(f, "; {}", issue)?;
        }
        Ok(())
    }
}

/// Main error type surfaced by the public orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("schema validation failed: {0}")]
    SchemaInvalid(ValidationReport),

    #[error("unknown knowledge base: {0}")]
    UnknownKb(KbId),

    #[error("unknown source '{source_id}' in knowledge base '{kb_id}'")]
    UnknownSource { kb_id: KbId, source_id: SourceId },

    #[error("unknown mapping '{mapping_name}' in knowledge base '{kb_id}'")]
    UnknownMapping { kb_id: KbId, mapping_name: String },

    #[error("ingestion already running for this source (run {current_run_id})")]
    Conflict { current_run_id: RunId },

    #[error("query contains write clauses and was rejected: {0}")]
    WriteForbidden(String),

    #[error("connector error: {0}")]
    Source(#[from] SourceError),

    #[error("graph storage error: {0}")]
    Graph(#[from] GraphError),

    #[error("embedding provider error: {0}")]
    Embed(#[from] EmbedError),
}

/// Errors from graph storage adapters
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query execution failed: {0}")]
    QueryFailed(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("vector index '{index}' has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("connection pool exhausted")]
    Busy,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Errors from the connector client
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connector returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout pulling from connector: {0}")]
    Timeout(String),

    #[error("invalid connector payload: {0}")]
    InvalidPayload(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Errors from embedding providers
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse provider response: {0}")]
    ResponseParse(String),

    #[error("timeout during embedding call")]
    Timeout,

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

/// Per-document mapping failures. Recorded on the run; never abort it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("missing key for node '{label}': path '{path}' resolved to no value")]
    MissingKey { label: String, path: String },

    #[error("key for node '{label}' is not a scalar: path '{path}'")]
    KeyNotScalar { label: String, path: String },

    #[error("document is not a JSON object")]
    NotAnObject,
}

/// Errors from path expression parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path expression '{expr}': {reason}")]
pub struct PathParseError {
    pub expr: String,
    pub reason: String,
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for embedding operations
pub type EmbedResult<T> = Result<T, EmbedError>;

/// Result type alias for connector operations
pub type SourceResult<T> = Result<T, SourceError>;
