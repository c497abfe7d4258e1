//! Ollama HTTP clients for generation (`/api/chat`) and embeddings (`/api/embed`).

use crate::llm::client::{Generation, GenerationProvider, TextStream, TokenUsage};
use crate::rag::embeddings::{check_dimension, normalize, EmbeddingProvider};
use crate::types::{AppError, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One `/api/chat` response object, or one NDJSON line when streaming.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn build_http(base_url: &str) -> Result<(reqwest::Client, String)> {
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
    Ok((http, base_url.trim_end_matches('/').to_string()))
}

async fn post_json(
    http: &reqwest::Client,
    url: &str,
    body: &Value,
    timeout: Option<Duration>,
) -> Result<reqwest::Response> {
    let mut request = http.post(url).json(body);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AppError::ProviderUnavailable(format!("HTTP request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::ProviderUnavailable(format!(
            "Ollama request failed ({}): {}",
            status, text
        )));
    }

    Ok(response)
}

/// Text generation against an Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self> {
        let (http, base_url) = build_http(base_url)?;
        Ok(Self {
            http,
            base_url,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(120),
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Upper bound for a blocking generation. Streams are not bounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chat_body(&self, system: &str, prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens
            }
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Turn one NDJSON line into an optional fragment, or `None` at end of stream.
fn parse_stream_line(line: &str) -> Option<Result<Option<String>>> {
    match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Some(Err(AppError::ProviderUnavailable(format!(
                    "Ollama stream error: {}",
                    error
                ))));
            }
            let fragment = chunk
                .message
                .map(|m| m.content)
                .filter(|content| !content.is_empty());
            if chunk.done {
                // Final line may still carry text.
                return fragment.map(|f| Ok(Some(f)));
            }
            Some(Ok(fragment))
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream line");
            Some(Ok(None))
        }
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    #[instrument(skip(self, system, prompt), fields(model = %self.model))]
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generation> {
        let body = self.chat_body(system, prompt, false);
        let response = post_json(&self.http, &self.chat_url(), &body, Some(self.timeout)).await?;

        let chunk: ChatChunk = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Failed to parse Ollama response: {}", e))
        })?;
        if let Some(error) = chunk.error {
            return Err(AppError::ProviderUnavailable(format!("Ollama error: {}", error)));
        }

        let text = chunk.message.map(|m| m.content).unwrap_or_default();
        let usage = TokenUsage::new(
            chunk.prompt_eval_count.unwrap_or(0),
            chunk.eval_count.unwrap_or(0),
        );
        debug!(chars = text.len(), total_tokens = usage.total_tokens, "Generation complete");

        Ok(Generation {
            text,
            usage,
            model: self.model.clone(),
        })
    }

    #[instrument(skip(self, system, prompt), fields(model = %self.model))]
    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream> {
        let body = self.chat_body(system, prompt, true);
        let response = post_json(&self.http, &self.chat_url(), &body, None).await?;
        let mut bytes = response.bytes_stream();

        let output = stream! {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AppError::ProviderUnavailable(format!("Stream error: {}", e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_stream_line(&line) {
                        Some(Ok(Some(fragment))) => yield Ok(fragment),
                        Some(Ok(None)) => {}
                        Some(Err(e)) => {
                            yield Err(e);
                            return;
                        }
                        None => return,
                    }
                }
            }

            let rest = String::from_utf8_lossy(&buffer).trim().to_string();
            if !rest.is_empty() {
                match parse_stream_line(&rest) {
                    Some(Ok(Some(fragment))) => yield Ok(fragment),
                    Some(Err(e)) => yield Err(e),
                    _ => {}
                }
            }
        };

        Ok(Box::new(Box::pin(output)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embeddings from an Ollama server, L2-normalized.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_input_chars: usize,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>, dimension: usize) -> Result<Self> {
        let (http, base_url) = build_http(base_url)?;
        Ok(Self {
            http,
            base_url,
            model: model.into(),
            dimension,
            batch_size: 32,
            max_input_chars: 2048,
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn prepare(&self, text: &str) -> String {
        if text.chars().count() > self.max_input_chars {
            warn!(
                chars = text.chars().count(),
                limit = self.max_input_chars,
                "Truncating embedding input"
            );
            return text.chars().take(self.max_input_chars).collect();
        }
        text.to_string()
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    #[instrument(skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size.max(1)) {
            let inputs: Vec<String> = batch.iter().map(|t| self.prepare(t)).collect();
            let body = json!({ "model": self.model, "input": inputs });

            let response = post_json(&self.http, &url, &body, Some(self.timeout)).await?;
            let parsed: EmbedResponse = response.json().await.map_err(|e| {
                AppError::ProviderUnavailable(format!("Failed to parse embedding response: {}", e))
            })?;

            if parsed.embeddings.len() != batch.len() {
                return Err(AppError::ProviderUnavailable(format!(
                    "Embedding provider returned {} vectors for {} inputs",
                    parsed.embeddings.len(),
                    batch.len()
                )));
            }

            for mut vector in parsed.embeddings {
                check_dimension(&vector, self.dimension)?;
                normalize(&mut vector);
                vectors.push(vector);
            }
        }

        debug!(vectors = vectors.len(), "Embedded batch");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_line() {
        let fragment = parse_stream_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#);
        assert!(matches!(fragment, Some(Ok(Some(ref s))) if s == "Hi"));

        let done = parse_stream_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#);
        assert!(done.is_none());

        let error = parse_stream_line(r#"{"error":"model not found"}"#);
        assert!(matches!(error, Some(Err(AppError::ProviderUnavailable(_)))));

        assert!(matches!(parse_stream_line("not json"), Some(Ok(None))));
    }

    #[test]
    fn test_embedder_serves_as_embedding_provider() {
        let embedder: std::sync::Arc<dyn EmbeddingProvider> = std::sync::Arc::new(
            OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text", 768).unwrap(),
        );
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.dimension(), 768);
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3.2").unwrap();
        assert_eq!(client.chat_url(), "http://localhost:11434/api/chat");
    }
}
