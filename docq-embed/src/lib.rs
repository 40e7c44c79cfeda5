//! Embedding boundary for docq.
//!
//! Maps text to fixed-length numeric vectors for nearest-neighbor retrieval.
//! The rest of the system only sees the [`EmbeddingProvider`] trait; the
//! concrete [`FastEmbedProvider`] runs a local ONNX model through fastembed.

pub mod config;
pub mod error;
pub mod provider;

pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
