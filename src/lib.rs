//! summary-tree-search: LLM-guided retrieval of methods in a Java
//! repository.
//!
//! A repository is parsed (externally) into a directory/file/class/method
//! tree, summarized bottom-up with an LLM, and then searched top-down:
//! at each level the model picks among similarity-ranked child summaries,
//! backtracking through its top choices, with one query-expansion retry
//! when the first pass finds nothing.

use anyhow::Result;

pub mod backend;
pub mod rank;
pub mod retriever;
pub mod summarizer;
pub mod tree;

pub use retriever::{RetrievalResult, Retriever};
pub use summarizer::{Summarizer, SummaryStats};
pub use tree::RepoTree;

/// Separator between sections of a user prompt.
pub const INPUT_SEPARATOR: &str =
    "##################################################################";

/// Main STS struct that owns the API backends and wires summarization and
/// retrieval together for the CLI.
pub struct STS {
    generator: backend::OpenAiGenerator,
    sim: backend::EmbeddingSimilarity,
}

impl STS {
    /// Build both backends from the environment. Requires `OPENAI_API_KEY`;
    /// see [`backend::OpenAiGenerator::from_env`] for the optional knobs.
    pub fn from_env() -> Result<Self> {
        let generator = backend::OpenAiGenerator::from_env()?;
        let sim = backend::EmbeddingSimilarity::from_env()?;
        Ok(Self { generator, sim })
    }

    /// Summarize a parsed tree in place.
    pub async fn summarize(&self, repo: &mut RepoTree) -> SummaryStats {
        Summarizer::new(&self.generator).summarize_repo(repo).await
    }

    /// Retrieve the method described by `query` from a summarized tree.
    pub async fn retrieve(&self, query: &str, repo: &RepoTree) -> RetrievalResult {
        Retriever::new(&self.generator, &self.sim)
            .retrieve(query, repo)
            .await
    }
}
