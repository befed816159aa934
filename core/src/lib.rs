//! # GraphLoom Core
//!
//! The ingestion orchestrator for the GraphLoom knowledge graph system:
//! schema DSL compiler, mapping engine, connector client, embedding
//! pipeline, run manager, and the public operation surface. Storage backends
//! and embedding providers plug in through the traits in [`traits`].

pub mod config;
pub mod connector;
pub mod embedding;
pub mod errors;
pub mod guard;
pub mod mapping;
pub mod orchestrator;
pub mod path;
pub mod registry;
pub mod runs;
pub mod schema;
pub mod status;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use errors::{EmbedError, GraphError, OrchestratorError, SourceError};
pub use orchestrator::{IngestReport, Orchestrator, SchemaReceipt};
pub use traits::{DocumentSource, EmbedderFactory, EmbeddingProvider, GraphStore};
pub use types::{EdgeRecord, KbId, NodeRecord, RunId, SourceId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::OrchestratorConfig;
    pub use crate::errors::*;
    pub use crate::orchestrator::{IngestReport, Orchestrator, SchemaReceipt};
    pub use crate::runs::{Run, RunState};
    pub use crate::schema::KbSchema;
    pub use crate::status::{KbHealth, KbStatus};
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
}
