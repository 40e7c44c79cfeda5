//! Abbreviation extraction and batched resolution.
//!
//! Documents in this corpus introduce abbreviations as "Expanded Phrase
//! (ABBR)". Extraction scans sentence by sentence for that pattern and keeps
//! the first sentence each distinct abbreviation appears in. Resolution sends
//! fixed-size batches of (abbreviation, sentence) pairs to the generation
//! service and asks for a JSON array of definitions; a malformed response
//! degrades the whole batch to "no definition" rather than trusting it
//! partially. A fixed delay is slept after every batch to respect the
//! service's rate limits.

use crate::generation::GenerationService;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default number of entries per resolution batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default pause after each batch.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(4);

/// A candidate abbreviation with the sentence that introduced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbbreviationEntry {
    /// The short uppercase token, e.g. "IMF".
    pub abbreviation: String,
    /// First sentence the abbreviation appeared in.
    pub context_sentence: String,
    /// The resolved definition, once known.
    pub definition: Option<String>,
}

/// "Expanded Phrase (ABBR)": up to ten capitalized-or-lowercase words,
/// then a parenthesized token starting with an uppercase letter. Accented
/// letters are allowed in the phrase since the corpus is not English-only.
fn candidate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"[A-Za-zÀ-ÿ'’\-]{2,}(?:\s+[A-Za-zÀ-ÿ'’\-]{2,}){0,9}\s*\(([A-Z][A-Z0-9.]{1,9})\)",
        )
        .unwrap()
    })
}

/// Split normalized text into sentences at `.`, `!`, or `?` followed by
/// whitespace. The terminator stays with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let followed_by_space = chars
                .peek()
                .is_none_or(|&(_, next)| next.is_whitespace());
            if followed_by_space {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Scan document text for abbreviation candidates.
///
/// Whitespace is normalized first so sentences broken across lines still
/// match. Only the first sentence each distinct abbreviation appears in is
/// kept; later repeats are ignored even when their context differs. Purely
/// numeric tokens are rejected.
pub fn extract_candidates(document_text: &str) -> Vec<AbbreviationEntry> {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap());
    let normalized = whitespace.replace_all(document_text, " ");

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for sentence in split_sentences(&normalized) {
        for captures in candidate_pattern().captures_iter(sentence) {
            let abbreviation = captures[1].trim().to_string();
            if abbreviation.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if seen.insert(abbreviation.clone()) {
                entries.push(AbbreviationEntry {
                    abbreviation,
                    context_sentence: sentence.to_string(),
                    definition: None,
                });
            }
        }
    }

    entries
}

#[derive(Debug, Deserialize)]
struct BatchDefinition {
    #[serde(default)]
    #[allow(dead_code)]
    abbreviation: Option<String>,
    #[serde(default)]
    definition: Option<String>,
}

/// Resolves abbreviation batches through the generation service.
pub struct AbbreviationResolver {
    service: Arc<dyn GenerationService>,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl AbbreviationResolver {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Resolve all entries, returning abbreviation → definition (or absent).
    ///
    /// Batches are processed strictly in sequence; the configured delay is
    /// slept after every batch regardless of how long the call took.
    pub async fn resolve(
        &self,
        entries: &[AbbreviationEntry],
    ) -> BTreeMap<String, Option<String>> {
        let mut definitions = BTreeMap::new();
        let batch_count = entries.len().div_ceil(self.batch_size);

        for (batch_index, batch) in entries.chunks(self.batch_size).enumerate() {
            tracing::info!(
                "Resolving abbreviation batch {}/{batch_count} ({} entries)",
                batch_index + 1,
                batch.len()
            );
            let resolved = self.resolve_batch(batch).await;
            for (entry, definition) in batch.iter().zip(resolved) {
                definitions.insert(entry.abbreviation.clone(), definition);
            }

            tokio::time::sleep(self.inter_batch_delay).await;
        }

        definitions
    }

    async fn resolve_batch(&self, batch: &[AbbreviationEntry]) -> Vec<Option<String>> {
        let prompt = build_batch_prompt(batch);
        match self.service.generate(&prompt).await {
            Ok(response) => parse_batch_response(&response, batch.len()),
            Err(error) => {
                tracing::warn!("Abbreviation batch call failed, keeping definitions absent: {error}");
                vec![None; batch.len()]
            }
        }
    }
}

fn build_batch_prompt(batch: &[AbbreviationEntry]) -> String {
    let mut prompt = String::from(
        "Here is a list of abbreviations with the sentence each one appeared in. \
         For each, return a JSON object {\"abbreviation\": \"...\", \"definition\": \"...\"}, \
         using null for the definition when it cannot be identified from the sentence.\n\nList:\n",
    );
    for (i, entry) in batch.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. Abbreviation: {}\n   Sentence: {}\n",
            i + 1,
            entry.abbreviation,
            entry.context_sentence
        ));
    }
    prompt.push_str(
        "\nRespond with ONLY a JSON array, for example:\n\
         [{\"abbreviation\": \"IMF\", \"definition\": \"International Monetary Fund\"}, ...]",
    );
    prompt
}

/// Parse a batch response into positional definitions.
///
/// The service sometimes wraps the array in prose or code fences, so the
/// outermost `[...]` span is extracted before parsing. Anything that still
/// fails to parse degrades the entire batch to absent definitions; an array
/// shorter than the batch leaves the trailing positions absent.
fn parse_batch_response(response: &str, batch_len: usize) -> Vec<Option<String>> {
    let absent = || vec![None; batch_len];

    let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) else {
        return absent();
    };
    if end < start {
        return absent();
    }

    let parsed: Vec<BatchDefinition> = match serde_json::from_str(&response[start..=end]) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!("Malformed abbreviation batch response: {error}");
            return absent();
        }
    };

    (0..batch_len)
        .map(|i| parsed.get(i).and_then(|d| d.definition.clone()))
        .collect()
}

/// Persist the resolved mapping as a JSON object keyed by abbreviation.
///
/// The artifact is an inspection log; nothing downstream reads it back, the
/// pipeline keeps inlining from the in-memory mapping.
pub async fn save_definitions(
    definitions: &BTreeMap<String, Option<String>>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(definitions)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing definitions to {}", path.display()))?;
    Ok(())
}
