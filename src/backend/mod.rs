//! Backend traits for the generation and similarity collaborators.
//!
//! The summarizer and retriever are generic over these so tests can drive
//! them with deterministic stubs.

pub mod cache;
pub mod embedding;
pub mod openai;

use std::future::Future;

use anyhow::Result;

pub use embedding::{cosine_similarity, EmbeddingSimilarity};
pub use openai::OpenAiGenerator;

/// One completed generation call, with the token usage the backend reported.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub total_tokens: usize,
}

/// Text-generation collaborator. Retries on transient failures are the
/// backend's own business; a returned error means retries were exhausted.
pub trait GenerationBackend: Send + Sync {
    /// Tokenizer length of `text`, used to enforce input budgets before
    /// any network call.
    fn encode_len(&self, text: &str) -> usize;

    /// Context window: max input + output tokens for one call.
    fn max_tokens(&self) -> usize;

    /// Number of calls the backend can serve concurrently.
    fn max_batch_size(&self) -> usize;

    fn generate(
        &self,
        system: &str,
        user: &str,
        max_output_tokens: usize,
    ) -> impl Future<Output = Result<Generation>> + Send;
}

/// Similarity-scoring collaborator. Scores are bounded (cosine range) and
/// deterministic for a given model version.
pub trait SimilarityBackend: Send + Sync {
    /// Score `query` against each candidate; output order matches input order.
    fn similarities(
        &self,
        query: &str,
        candidates: &[String],
    ) -> impl Future<Output = Result<Vec<f32>>> + Send;
}
