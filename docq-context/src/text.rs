//! Recursive delimiter-based text splitting with chunk overlap.
//!
//! Document text is split into passages of bounded length so each passage can
//! be embedded and retrieved independently. Splitting is recursive: the text
//! is first divided at the highest-priority delimiter (sentence terminators),
//! and any piece still larger than the segment budget is re-split with the
//! next delimiter down, ending with a hard character split if nothing else
//! applies. Segments are then packed greedily into chunks of at most
//! `max_chunk_length` characters, with the last `overlap` characters of each
//! chunk repeated at the start of its successor so that retrieval never loses
//! a sentence that straddles a chunk boundary.
//!
//! ```
//! use docq_context::text::ChunkBuilder;
//!
//! let builder = ChunkBuilder::with_defaults("report.pdf".to_string(), 1);
//! let text = (0..60).map(|_| "Sea surface temperature rises in summer. ").collect::<String>();
//! let chunks = builder.get_chunks(&text);
//! assert!(chunks.len() > 1);
//! for chunk in &chunks {
//!     assert!(chunk.chunk_text.len() <= 450);
//! }
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// Delimiter patterns for prose documents, ordered from most to least
/// significant: sentence terminators, paragraph breaks, line breaks, spaces.
pub const DOCUMENT_DELIMITERS: &[&str] = &[
    r"[.!?]\s+", // Sentence terminators followed by whitespace
    r"\n\n",     // Paragraphs
    r"\n",       // Line breaks
    r" ",        // Spaces
];

/// Default maximum chunk length in characters.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 450;

/// Default number of trailing characters shared between consecutive chunks.
pub const DEFAULT_OVERLAP: usize = 100;

/// Configures how one page of document text is split into [`TextChunk`]s.
///
/// Holds the document provenance recorded on every produced chunk, the
/// compiled delimiter list, and the chunk size / overlap budget.
pub struct ChunkBuilder {
    source: String,
    page: u32,
    delimiters: Vec<Regex>,
    max_chunk_length: usize,
    overlap: usize,
}

/// One bounded-length passage of document text with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct TextChunk {
    /// Name of the source document.
    pub source: String,
    /// 1-based page number the text came from.
    pub page: u32,
    /// Order of this chunk within the page (0-indexed).
    pub sequence: usize,
    /// The passage text, including any overlap carried from the previous chunk.
    pub chunk_text: String,
}

impl ChunkBuilder {
    /// Create a builder with explicit delimiter patterns and size budget.
    ///
    /// `overlap` is clamped below `max_chunk_length` so a chunk always has
    /// room for fresh content after its overlap seed.
    ///
    /// # Panics
    ///
    /// Panics if any delimiter pattern is not a valid regular expression.
    pub fn new(
        source: String,
        page: u32,
        delimiter_patterns: &[&str],
        max_chunk_length: usize,
        overlap: usize,
    ) -> Self {
        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| Regex::new(pattern).unwrap())
            .collect();
        let max_chunk_length = max_chunk_length.max(1);

        ChunkBuilder {
            source,
            page,
            delimiters,
            max_chunk_length,
            overlap: overlap.min(max_chunk_length - 1),
        }
    }

    /// Builder with [`DOCUMENT_DELIMITERS`] and the default 450/100 budget.
    pub fn with_defaults(source: String, page: u32) -> Self {
        Self::new(
            source,
            page,
            DOCUMENT_DELIMITERS,
            DEFAULT_MAX_CHUNK_LENGTH,
            DEFAULT_OVERLAP,
        )
    }

    /// Split `page_text` into chunks of at most `max_chunk_length` characters.
    ///
    /// Consecutive chunks share the last `overlap` characters of their
    /// predecessor. Empty input yields no chunks.
    ///
    /// Lengths are measured in bytes, which for multibyte text is stricter
    /// than a character count. The one exception is a single character wider
    /// than the segment budget, which is kept whole rather than split, so a
    /// degenerate budget can be exceeded by at most one character.
    pub fn get_chunks(&self, page_text: &str) -> Vec<TextChunk> {
        if page_text.is_empty() {
            return Vec::new();
        }

        // Atomic segments must leave room for the overlap seed, otherwise a
        // fresh chunk could overflow before receiving any new content.
        let max_segment = self.max_chunk_length - self.overlap;
        let segments = self.split_recursively(page_text, 0, max_segment, 0);

        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut current = String::new();

        for segment_range in segments {
            let segment_text = &page_text[segment_range];

            if !current.is_empty()
                && current.len() + segment_text.len() > self.max_chunk_length
            {
                let seed = overlap_tail(&current, self.overlap).to_string();
                self.push_chunk(&mut chunks, std::mem::take(&mut current));
                current = seed;
            }
            current.push_str(segment_text);
        }

        if !current.is_empty() {
            self.push_chunk(&mut chunks, current);
        }

        chunks
    }

    fn push_chunk(&self, chunks: &mut Vec<TextChunk>, chunk_text: String) {
        chunks.push(TextChunk {
            source: self.source.clone(),
            page: self.page,
            sequence: chunks.len(),
            chunk_text,
        });
    }

    // Recursively splits the text into byte ranges of the original string.
    // Each returned range is at most `max_segment` bytes long, or is a
    // delimiter match of the current priority level.
    fn split_recursively(
        &self,
        text: &str,
        delimiter_idx: usize,
        max_segment: usize,
        current_offset: usize,
    ) -> Vec<Range<usize>> {
        let mut result_segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return result_segments;
        }

        if text.len() <= max_segment {
            result_segments.push(current_offset..current_offset + text.len());
            return result_segments;
        }

        // All delimiters exhausted: hard split at character boundaries.
        if delimiter_idx >= self.delimiters.len() {
            let mut local_start = 0;
            while local_start < text.len() {
                let mut local_end = (local_start + max_segment).min(text.len());
                while local_end > local_start && !text.is_char_boundary(local_end) {
                    local_end -= 1;
                }
                // A budget smaller than one character must still advance:
                // take the whole character and accept the oversized segment.
                if local_end == local_start {
                    local_end = local_start + 1;
                    while local_end < text.len() && !text.is_char_boundary(local_end) {
                        local_end += 1;
                    }
                }
                result_segments.push(current_offset + local_start..current_offset + local_end);
                local_start = local_end;
            }
            return result_segments;
        }

        let current_delimiter = &self.delimiters[delimiter_idx];
        let mut local_start = 0;

        for mat in current_delimiter.find_iter(text) {
            // Keep the delimiter attached to the text it terminates when the
            // whole piece fits, so sentences stay atomic with their
            // terminators. Oversized pieces are re-split at the next level
            // and the delimiter becomes its own segment.
            if mat.end() - local_start <= max_segment {
                result_segments.push(current_offset + local_start..current_offset + mat.end());
            } else {
                if mat.start() > local_start {
                    result_segments.extend(self.split_recursively(
                        &text[local_start..mat.start()],
                        delimiter_idx + 1,
                        max_segment,
                        current_offset + local_start,
                    ));
                }
                result_segments.push(current_offset + mat.start()..current_offset + mat.end());
            }
            local_start = mat.end();
        }

        if local_start < text.len() {
            result_segments.extend(self.split_recursively(
                &text[local_start..],
                delimiter_idx + 1,
                max_segment,
                current_offset + local_start,
            ));
        }

        result_segments
    }
}

/// The trailing `overlap` characters of `s`, aligned to a char boundary.
fn overlap_tail(s: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    if s.len() <= overlap {
        return s;
    }
    let mut start = s.len() - overlap;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
