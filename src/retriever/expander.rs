//! Query expansion for the second retrieval attempt.
//!
//! Walks the summary tree greedily along high-similarity children to
//! assemble a pseudo-relevance document, then asks the model to rewrite
//! the query against it.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;

use crate::backend::{GenerationBackend, SimilarityBackend};
use crate::rank::{self, Candidate};
use crate::tree::DirNode;
use crate::INPUT_SEPARATOR;

use super::decision::extract_json_object;
use super::fits;
use super::prompts::{EXP_MAX_OUTPUT_TOKENS, EXP_MAX_REF_COUNT, EXP_QUERY_SYSTEM_PROMPT};

#[derive(Debug, Deserialize)]
struct ExpandedQuery {
    expanded_query: String,
}

/// Collect reference summaries under `dir`, best-first: the top children by
/// similarity contribute their subtrees (depth-first) and then their own
/// summaries.
fn collect_in_dir<'a, S: SimilarityBackend>(
    sim: &'a S,
    query: &'a str,
    dir: &'a DirNode,
) -> BoxFuture<'a, Result<Vec<String>>> {
    async move {
        let mut candidates = Vec::new();
        for sub in &dir.subdirectories {
            if let Some(text) = sub.summary.usable() {
                candidates.push(Candidate {
                    id: sub.id,
                    name: sub.name.clone(),
                    signature: None,
                    summary: text.to_string(),
                });
            }
        }
        for file in &dir.files {
            if let Some(text) = file.summary.usable() {
                candidates.push(Candidate {
                    id: file.id,
                    name: file.name.clone(),
                    signature: None,
                    summary: text.to_string(),
                });
            }
        }

        let ranked = rank::rank(sim, query, candidates).await?;

        let mut collected = Vec::new();
        for candidate in ranked.into_iter().take(EXP_MAX_REF_COUNT) {
            if let Some(sub) = dir.find_subdirectory(candidate.id.into()) {
                collected.extend(collect_in_dir(sim, query, sub).await?);
            }
            collected.push(candidate.summary);
        }

        Ok(collected)
    }
    .boxed()
}

/// Expand `query` against the summarized tree rooted at `root`.
///
/// Returns the rewritten query and the tokens spent on the expansion call.
pub async fn expand<G, S>(
    generator: &G,
    sim: &S,
    query: &str,
    root: &DirNode,
) -> Result<(String, usize)>
where
    G: GenerationBackend,
    S: SimilarityBackend,
{
    let mut summaries = Vec::new();
    if let Some(text) = root.summary.usable() {
        summaries.push(text.to_string());
    }
    summaries.extend(collect_in_dir(sim, query, root).await?);

    let mut user = format!("Query: {query}\n{INPUT_SEPARATOR}\nDocument:\n");
    for (idx, summary) in summaries.iter().enumerate() {
        let line = format!("{summary}\n");
        if !fits(
            generator,
            EXP_QUERY_SYSTEM_PROMPT,
            &format!("{user}{line}"),
            EXP_MAX_OUTPUT_TOKENS,
        ) {
            tracing::warn!(
                dropped = summaries.len() - idx,
                "Expansion document full, dropping remaining summaries"
            );
            break;
        }
        user.push_str(&line);
    }

    let generation = generator
        .generate(EXP_QUERY_SYSTEM_PROMPT, &user, EXP_MAX_OUTPUT_TOKENS)
        .await
        .context("Query expansion call failed")?;

    let json = extract_json_object(&generation.text)
        .context("Query expansion response contains no JSON object")?;
    let parsed: ExpandedQuery =
        serde_json::from_str(json).context("Query expansion response is not formatted")?;

    tracing::debug!(expanded_query = %parsed.expanded_query, "Query expanded");

    Ok((parsed.expanded_query, generation.total_tokens))
}
