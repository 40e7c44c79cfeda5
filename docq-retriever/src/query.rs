//! Retrieval-grounded question answering.

use crate::generation::GenerationService;
use crate::index::{DEFAULT_K, IndexManager};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

/// Answers questions from index content alone.
///
/// Retrieved units are concatenated into the prompt in similarity order and
/// the service's reply is returned verbatim, with no post-processing.
pub struct QueryAnswerer {
    index: IndexManager,
    service: Arc<dyn GenerationService>,
}

impl QueryAnswerer {
    pub fn new(index: IndexManager, service: Arc<dyn GenerationService>) -> Self {
        Self { index, service }
    }

    pub async fn answer(&self, question: &str, k: usize) -> Result<String> {
        let k = if k == 0 { DEFAULT_K } else { k };
        let started = Instant::now();

        let units = self.index.query(question, k).await?;
        tracing::info!(
            "Retrieved {} unit(s) for '{question}' in {:.2}s",
            units.len(),
            started.elapsed().as_secs_f64()
        );

        let context = units
            .iter()
            .map(|unit| unit.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = build_prompt(&context, question);

        let answer = self.service.generate(&prompt).await?;
        tracing::info!(
            "Answer generated in {:.2}s total",
            started.elapsed().as_secs_f64()
        );
        Ok(answer)
    }
}

fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Context:\n{context}\n\nQuestion: {question}\n\
         Answer using only the given context. Expand any abbreviations that \
         appear, using the context or general knowledge. If the answer is \
         not in the context, say so."
    )
}
