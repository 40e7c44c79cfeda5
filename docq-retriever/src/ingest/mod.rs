//! Ingestion: enrichment sub-pipelines and their orchestration.
//!
//! Three sub-pipelines run strictly in sequence over one document:
//! [`abbreviations`] fully before [`figures`], both before [`fuser`] and
//! indexing, so the rate-limit bookkeeping in each stays correct.

pub mod abbreviations;
pub mod figures;
pub mod fuser;
pub mod pipeline;

pub use pipeline::{IngestConfig, IngestPipeline, IngestReport};
