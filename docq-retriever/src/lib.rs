//! docq-retriever: question answering over a growing PDF document corpus.
//!
//! A document arrives as extracted pages (text, drawing-element counts, and
//! rendered page images; raw PDF parsing happens outside this crate). Three
//! enrichment passes run in sequence over it: text chunking, abbreviation
//! resolution through batched generation-service calls, and figure analysis
//! through rate-limited vision calls. Their outputs are fused into one
//! sequence of indexable units, embedded, and stored in a persistent vector
//! index that supports both fresh builds and incremental merges. Queries
//! retrieve the top-k units and delegate answer generation to the same
//! generation service.
//!
//! ## Key Modules
//!
//! - **[`document`]**: the extracted-document interface the pipeline consumes
//! - **[`ingest`]**: abbreviations, figures, fusion, and the pipeline itself
//! - **[`index`]**: the unit model, vector store, and index state machine
//! - **[`generation`]**: the hosted generation-service boundary
//! - **[`query`]**: retrieve-then-generate question answering
//!
//! ## Data flow
//!
//! ```text
//! ExtractedDocument → [Chunker, AbbreviationResolver, FigureAnalyzer]
//!                   → fuse → IndexManager (persist)
//! question → IndexManager (retrieve) → QueryAnswerer (generate) → answer
//! ```

pub mod document;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod query;
