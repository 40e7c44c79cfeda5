//! Text chunking for the docq retrieval pipeline.
//!
//! This crate turns raw document text into bounded, overlapping passages
//! suitable for embedding and nearest-neighbor retrieval. See [`text`] for
//! the splitting machinery.

pub mod text;

pub use text::{
    ChunkBuilder, DEFAULT_MAX_CHUNK_LENGTH, DEFAULT_OVERLAP, DOCUMENT_DELIMITERS, TextChunk,
};
