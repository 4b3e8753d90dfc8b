//! Embedding-based similarity backend using the OpenAI embeddings API and
//! cosine similarity over the returned vectors.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simsimd::SpatialSimilarity;

use super::cache::EmbeddingCache;
use super::SimilarityBackend;

const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const API_URL: &str = "https://api.openai.com/v1/embeddings";
const BATCH_SIZE: usize = 100;
const MAX_ATTEMPTS: usize = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct EmbeddingSimilarity {
    client: reqwest::Client,
    api_key: String,
    cache: Mutex<EmbeddingCache>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingSimilarity {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Self::new(api_key)
    }

    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            cache: Mutex::new(EmbeddingCache::new()),
        })
    }

    /// Embed `texts`, serving repeats from the cache. Returns vectors in
    /// input order.
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();

        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("Embedding cache lock poisoned"))?;
            for (i, text) in texts.iter().enumerate() {
                match cache.get(text) {
                    Some(emb) => results[i] = Some(emb),
                    None => pending.push((i, text.clone())),
                }
            }
        }

        for chunk in pending.chunks(BATCH_SIZE) {
            let inputs: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
            let embeddings = self.embed_batch(&inputs).await?;

            let mut cache = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("Embedding cache lock poisoned"))?;
            for ((i, text), emb) in chunk.iter().zip(embeddings) {
                cache.put(text.clone(), emb.clone());
                results[*i] = Some(emb);
            }
        }

        results
            .into_iter()
            .map(|r| r.context("Missing embedding for input"))
            .collect()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: EMBEDDING_MODEL.to_string(),
            input: texts.to_vec(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .post(API_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.as_u16() == 429 {
                        if attempt < MAX_ATTEMPTS {
                            let delay = BACKOFF_BASE_MS * (1 << (attempt - 1));
                            tracing::warn!(attempt, "Embeddings API rate limited, retrying in {}ms", delay);
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            continue;
                        }
                        anyhow::bail!("Rate limit exceeded after {} attempts", MAX_ATTEMPTS);
                    }

                    if !status.is_success() {
                        let error_text = resp.text().await.unwrap_or_default();
                        anyhow::bail!("Embeddings API error {}: {}", status, error_text);
                    }

                    let body: EmbeddingResponse = resp
                        .json()
                        .await
                        .context("Failed to parse embeddings response")?;

                    if body.data.len() != texts.len() {
                        anyhow::bail!(
                            "Embedding count mismatch: expected {}, got {}",
                            texts.len(),
                            body.data.len()
                        );
                    }

                    // The API may return items out of order.
                    let mut data = body.data;
                    data.sort_by_key(|d| d.index);

                    return Ok(data.into_iter().map(|d| d.embedding).collect());
                }
                Err(e) => {
                    if e.is_timeout() && attempt < MAX_ATTEMPTS {
                        let delay = BACKOFF_BASE_MS * (1 << (attempt - 1));
                        tracing::warn!(attempt, "Embeddings request timed out, retrying in {}ms", delay);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    return Err(e).context("Embeddings request failed");
                }
            }
        }

        anyhow::bail!("Failed after {} attempts", MAX_ATTEMPTS)
    }
}

impl SimilarityBackend for EmbeddingSimilarity {
    async fn similarities(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(query.to_string());
        texts.extend(candidates.iter().cloned());

        let mut embeddings = self.embed_all(&texts).await?;
        let query_embedding = embeddings.remove(0);

        Ok(embeddings
            .iter()
            .map(|e| cosine_similarity(&query_embedding, e))
            .collect())
    }
}

/// Cosine similarity between a query embedding and a candidate embedding,
/// via simsimd where possible. Degenerate inputs (length mismatch, empty or
/// zero vectors) score 0.0 so a broken candidate never outranks a real one.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> f32 {
    if query.len() != candidate.len() || query.is_empty() {
        return 0.0;
    }

    let score = match <f32 as SpatialSimilarity>::cos(query, candidate) {
        Some(distance) => (1.0 - distance) as f32,
        None => scalar_cosine(query, candidate),
    };

    if score.is_finite() {
        score
    } else {
        0.0
    }
}

fn scalar_cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut a_sq = 0.0_f32;
    let mut b_sq = 0.0_f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        a_sq += x * x;
        b_sq += y * y;
    }

    let norm = (a_sq * b_sq).sqrt();
    if norm == 0.0 {
        return 0.0;
    }

    dot / norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_summary_outranks_unrelated_one() {
        // A summary embedding pointing the query's way scores ~1 even at a
        // different magnitude; an orthogonal one scores ~0.
        let query = vec![0.6, 0.8, 0.0];
        let on_topic = vec![0.3, 0.4, 0.0];
        let off_topic = vec![0.0, 0.0, 1.0];

        assert!((cosine_similarity(&query, &on_topic) - 1.0).abs() < 1e-3);
        assert!(cosine_similarity(&query, &off_topic).abs() < 1e-3);
    }

    #[test]
    fn test_negated_direction_scores_minus_one() {
        let query = vec![0.2, -0.5, 0.7];
        let negated: Vec<f32> = query.iter().map(|x| -x).collect();

        assert!((cosine_similarity(&query, &negated) + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.4, 0.3]), 0.0);
    }

    #[test]
    fn test_scalar_fallback_agrees_on_direction() {
        let query = vec![0.5, 0.5];
        assert!((scalar_cosine(&query, &[1.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!(scalar_cosine(&query, &[1.0, -1.0]).abs() < 1e-6);
    }
}
