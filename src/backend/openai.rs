//! OpenAI chat-completions generation backend.
//!
//! Wraps the API with bounded retry and exposes the tokenizer the budget
//! checks need.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use super::{Generation, GenerationBackend};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_ATTEMPTS: usize = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const TEMPERATURE: f32 = 0.2;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: usize = 16_384;
const DEFAULT_MAX_BATCH_SIZE: usize = 8;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    max_batch_size: usize,
    bpe: CoreBPE,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    n: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: usize,
}

impl OpenAiGenerator {
    /// Create a client from environment variables: `OPENAI_API_KEY`
    /// (required), `OPENAI_MODEL`, `OPENAI_MAX_TOKENS`,
    /// `OPENAI_MAX_BATCH_SIZE`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("OPENAI_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let declared_batch = std::env::var("OPENAI_MAX_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BATCH_SIZE);

        Self::new(api_key, model, max_tokens, declared_batch)
    }

    pub fn new(
        api_key: String,
        model: String,
        max_tokens: usize,
        declared_batch_size: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let bpe = tiktoken_rs::cl100k_base().context("Failed to load cl100k_base tokenizer")?;

        // Keep one slot free so batched summarization never saturates the
        // server's declared capacity.
        let max_batch_size = declared_batch_size.saturating_sub(1).max(1);

        Ok(Self {
            client,
            api_key,
            model,
            max_tokens,
            max_batch_size,
            bpe,
        })
    }

    async fn call_api(&self, system: &str, user: &str, max_output_tokens: usize) -> Result<Generation> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: max_output_tokens,
            n: 1,
            temperature: TEMPERATURE,
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

                    if status.as_u16() == 429 || status.is_server_error() {
                        if attempt < MAX_ATTEMPTS {
                            let delay = BACKOFF_BASE_MS * (1 << (attempt - 1));
                            tracing::warn!(
                                status = status.as_u16(),
                                attempt,
                                "OpenAI API busy, retrying in {}ms",
                                delay
                            );
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            continue;
                        }
                        let body = resp.text().await.unwrap_or_default();
                        anyhow::bail!(
                            "OpenAI API error {} after {} attempts: {}",
                            status,
                            MAX_ATTEMPTS,
                            body
                        );
                    }

                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        anyhow::bail!("OpenAI API error {}: {}", status, body);
                    }

                    let body: ChatResponse = resp
                        .json()
                        .await
                        .context("Failed to parse OpenAI API response")?;

                    let text = body
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .context("OpenAI API response contained no choices")?;
                    let total_tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);

                    return Ok(Generation { text, total_tokens });
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS {
                        let delay = BACKOFF_BASE_MS * (1 << (attempt - 1));
                        tracing::warn!(attempt, "OpenAI request failed ({}), retrying in {}ms", e, delay);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    return Err(e).context("OpenAI request failed");
                }
            }
        }

        anyhow::bail!("Failed after {} attempts", MAX_ATTEMPTS)
    }
}

impl GenerationBackend for OpenAiGenerator {
    fn encode_len(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn generate(&self, system: &str, user: &str, max_output_tokens: usize) -> Result<Generation> {
        self.call_api(system, user, max_output_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::new("test-key".to_string(), DEFAULT_MODEL.to_string(), 4096, 4).unwrap()
    }

    #[test]
    fn test_encode_len_nonzero() {
        let gen = generator();
        assert!(gen.encode_len("Summarize the method below.") > 0);
        assert_eq!(gen.encode_len(""), 0);
    }

    #[test]
    fn test_batch_size_safety_margin() {
        let gen = generator();
        assert_eq!(gen.max_batch_size(), 3);

        let single = OpenAiGenerator::new("k".to_string(), DEFAULT_MODEL.to_string(), 4096, 1).unwrap();
        assert_eq!(single.max_batch_size(), 1);
    }
}
