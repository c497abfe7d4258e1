//! Ollama client tests against a mocked server.
//!
//! These tests use wiremock to stand in for the Ollama API and validate:
//! - Blocking and streaming chat
//! - Batched embeddings
//! - Error handling
//! - A full pipeline wired to both clients

#![cfg(feature = "ollama")]

use std::sync::Arc;

use docqa::llm::ollama::{OllamaClient, OllamaEmbedder};
use docqa::llm::GenerationProvider;
use docqa::rag::embeddings::EmbeddingProvider;
use docqa::{
    AppError, DocqaConfig, DocqaPipeline, IndexRequest, InMemoryChunkRepository, QuestionRequest,
    VectorStore,
};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============= Helper Functions =============

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "model": "llama3.2",
        "created_at": "2024-01-01T00:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": true,
        "prompt_eval_count": 42,
        "eval_count": 7
    })
}

/// NDJSON body with one line per fragment and a final `done` line.
fn chat_stream(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(
            &json!({
                "model": "llama3.2",
                "message": {"role": "assistant", "content": fragment},
                "done": false
            })
            .to_string(),
        );
        body.push('\n');
    }
    body.push_str(&json!({"model": "llama3.2", "message": {"role": "assistant", "content": ""}, "done": true}).to_string());
    body.push('\n');
    body
}

async fn collect_stream(client: &OllamaClient) -> Vec<Result<String, AppError>> {
    client
        .stream("system", "prompt")
        .await
        .unwrap()
        .collect()
        .await
}

// ============= Chat =============

#[tokio::test]
async fn test_generate_returns_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Aspirin 81 mg [Source 1].")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "llama3.2").unwrap();
    let generation = client.generate("system", "prompt").await.unwrap();

    assert_eq!(generation.text, "Aspirin 81 mg [Source 1].");
    assert_eq!(generation.usage.prompt_tokens, 42);
    assert_eq!(generation.usage.completion_tokens, 7);
    assert_eq!(generation.usage.total_tokens, 49);
    assert_eq!(generation.model, "llama3.2");
}

#[tokio::test]
async fn test_generate_sends_system_prompt_and_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Any allergies?"}
            ],
            "options": {"num_predict": 64}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Penicillin.")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&format!("{}/", server.uri()), "llama3.2")
        .unwrap()
        .with_max_tokens(64);
    let generation = client.generate("Be brief.", "Any allergies?").await.unwrap();
    assert_eq!(generation.text, "Penicillin.");
}

#[tokio::test]
async fn test_server_error_is_provider_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "llama3.2").unwrap();

    let result = client.generate("system", "prompt").await;
    assert!(matches!(result, Err(AppError::ProviderUnavailable(ref m)) if m.contains("model not loaded")));

    let streamed = client.stream("system", "prompt").await;
    assert!(matches!(streamed, Err(AppError::ProviderUnavailable(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_provider_unavailable() {
    let client = OllamaClient::new("http://127.0.0.1:1", "llama3.2").unwrap();
    let result = client.generate("system", "prompt").await;
    assert!(matches!(result, Err(AppError::ProviderUnavailable(_))));
}

#[tokio::test]
async fn test_stream_yields_fragments_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(chat_stream(&["Metformin ", "500 mg ", "[Source 1]."]), "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "llama3.2").unwrap();
    let fragments: Vec<String> = collect_stream(&client)
        .await
        .into_iter()
        .map(|f| f.unwrap())
        .collect();

    assert_eq!(fragments, vec!["Metformin ", "500 mg ", "[Source 1]."]);
}

#[tokio::test]
async fn test_stream_skips_malformed_lines() {
    let server = MockServer::start().await;
    let body = format!("not json\n{}", chat_stream(&["ok"]));
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "llama3.2").unwrap();
    let fragments = collect_stream(&client).await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].as_deref().ok(), Some("ok"));
}

#[tokio::test]
async fn test_stream_error_line_ends_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "{}\n{}\n{}",
        json!({"message": {"content": "partial"}, "done": false}),
        json!({"error": "out of memory"}),
        json!({"message": {"content": "never"}, "done": false}),
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "llama3.2").unwrap();
    let fragments = collect_stream(&client).await;

    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].as_deref().ok(), Some("partial"));
    assert!(matches!(fragments[1], Err(AppError::ProviderUnavailable(_))));
}

// ============= Embeddings =============

#[tokio::test]
async fn test_embed_batch_normalizes_vectors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "all-minilm", "input": ["first", "second"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "all-minilm",
            "embeddings": [[3.0, 4.0], [0.0, 2.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&server.uri(), "all-minilm", 2).unwrap();
    let vectors = embedder
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    assert!((vectors[0][0] - 0.6).abs() < 1e-6);
    assert!((vectors[0][1] - 0.8).abs() < 1e-6);
    assert!((vectors[1][1] - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_embed_batch_splits_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["c"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 1.0]]})))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&server.uri(), "all-minilm", 2)
        .unwrap()
        .with_batch_size(2);
    let inputs: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let vectors = embedder.embed_batch(&inputs).await.unwrap();

    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0]);
}

#[tokio::test]
async fn test_embed_rejects_wrong_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0, 0.0]]})))
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&server.uri(), "all-minilm", 2).unwrap();
    let result = embedder.embed("text").await;
    assert!(matches!(
        result,
        Err(AppError::Vector(docqa_vector::Error::DimensionMismatch { expected: 2, actual: 3 }))
    ));
}

#[tokio::test]
async fn test_embed_rejects_missing_vectors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})))
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&server.uri(), "all-minilm", 2).unwrap();
    let result = embedder
        .embed_batch(&["one".to_string(), "two".to_string()])
        .await;
    assert!(matches!(result, Err(AppError::ProviderUnavailable(_))));
}

#[tokio::test]
async fn test_embed_truncates_long_inputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["abcd"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&server.uri(), "all-minilm", 2)
        .unwrap()
        .with_max_input_chars(4);
    assert!(embedder.embed("abcdefgh").await.is_ok());
}

// ============= Pipeline =============

#[tokio::test]
async fn test_pipeline_over_ollama() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            "Discharged on lisinopril 10 mg daily [Source 1].",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let store = VectorStore::open(docqa_vector::Config::memory("all-minilm", 2))
        .await
        .unwrap();
    let pipeline = DocqaPipeline::new(
        &DocqaConfig::default(),
        store,
        Arc::new(OllamaEmbedder::new(&server.uri(), "all-minilm", 2).unwrap()),
        Arc::new(OllamaClient::new(&server.uri(), "llama3.2").unwrap()),
        Arc::new(InMemoryChunkRepository::new()),
    )
    .unwrap();

    pipeline
        .index_document(IndexRequest {
            document_id: "note-9".into(),
            text: "Discharge medications: lisinopril 10 mg by mouth once daily for hypertension.".into(),
            chunking_strategy: None,
        })
        .await
        .unwrap();

    let response = pipeline
        .ask(QuestionRequest::new("What antihypertensive was prescribed?"))
        .await
        .unwrap();

    assert!(response.has_answer);
    assert_eq!(response.model.as_deref(), Some("llama3.2"));
    assert_eq!(response.tokens_used.map(|u| u.total_tokens), Some(49));
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].document_id, "note-9");
}
