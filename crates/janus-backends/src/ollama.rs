//! Ollama embedding and LLM intent backends.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use janus_core::{
    defaults, EmbeddingBackend, Error, IntentDecision, IntentProvider, QueryKind, Result,
};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;

/// Ollama embedding backend.
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedding {
    /// Create a new backend with explicit configuration.
    pub fn with_config(base_url: String, model: String, dimension: usize) -> Self {
        let timeout_secs = std::env::var("JANUS_EMBED_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::EMBED_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        info!(
            subsystem = "backends",
            component = "ollama",
            base_url = %base_url,
            model = %model,
            dimension,
            "Initializing Ollama embedding backend"
        );

        Self {
            client,
            base_url,
            model,
            dimension,
            timeout_secs,
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OLLAMA_BASE` | `http://127.0.0.1:11434` |
    /// | `OLLAMA_EMBED_MODEL` | `nomic-embed-text` |
    /// | `JANUS_EMBED_DIM` | `384` |
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model =
            std::env::var("OLLAMA_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        let dimension = std::env::var("JANUS_EMBED_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::EMBED_DIMENSION);

        Self::with_config(base_url, model, dimension)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedding {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "Embedding request failed: {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Invalid response: {}", e)))?;

        for embedding in &parsed.embeddings {
            if embedding.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        debug!(
            subsystem = "backends",
            component = "ollama",
            op = "embed_texts",
            input_count = texts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding complete"
        );
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// LLM INTENT TIER
// =============================================================================

const INTENT_SYSTEM_PROMPT: &str = "You classify database queries. Reply with a JSON object \
{\"kind\": \"sql\" | \"semantic\" | \"hybrid\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}. \
Structured SQL is \"sql\", natural-language similarity questions are \"semantic\", \
mixed queries are \"hybrid\".";

/// LLM intent tier over Ollama's chat API.
///
/// The caller enforces the 300 ms deadline; this client only bounds the
/// underlying HTTP request.
pub struct OllamaIntentProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct IntentVerdict {
    kind: String,
    confidence: f32,
    #[serde(default)]
    reason: String,
}

impl OllamaIntentProvider {
    pub fn with_config(base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(defaults::LLM_INTENT_DEADLINE_MS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            model,
        }
    }

    /// Create from environment variables (`OLLAMA_BASE`, `JANUS_INTENT_MODEL`).
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model = std::env::var("JANUS_INTENT_MODEL")
            .unwrap_or_else(|_| defaults::INTENT_MODEL.to_string());
        Self::with_config(base_url, model)
    }
}

#[async_trait]
impl IntentProvider for OllamaIntentProvider {
    async fn classify(&self, text: &str) -> Result<IntentDecision> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: INTENT_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            stream: false,
            format: "json".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::LlmUnavailable(format!(
                "Chat request failed: {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmUnavailable(format!("Invalid response: {}", e)))?;

        let verdict: IntentVerdict = serde_json::from_str(&parsed.message.content)
            .map_err(|e| Error::LlmUnavailable(format!("Unparseable verdict: {}", e)))?;

        let kind = match verdict.kind.as_str() {
            "sql" => QueryKind::Sql,
            "semantic" => QueryKind::Semantic,
            "hybrid" => QueryKind::Hybrid,
            other => {
                warn!(kind = other, "LLM returned unknown intent kind");
                return Err(Error::LlmUnavailable(format!(
                    "Unknown intent kind: {}",
                    other
                )));
            }
        };

        Ok(IntentDecision {
            kind,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reasoning: verdict.reason,
        })
    }
}
