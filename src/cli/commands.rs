//! Command handlers.

use futures::StreamExt;
use std::path::Path;

use super::output::Output;
use super::Commands;
use crate::rag::pipeline::DocqaPipeline;
use crate::rag::synthesizer::{AnswerAccumulator, AnswerEvent};
use crate::types::{AppError, IndexRequest, QuestionRequest, Result, SearchRequest};
use crate::utils::toml_config::DocqaConfig;
use docqa_vector::DeleteOutcome;

/// Run one command against the configured pipeline.
pub async fn run(command: Commands, config: &DocqaConfig, output: &Output) -> Result<()> {
    if let Commands::Config = command {
        return show_config(config, output);
    }

    let pipeline = DocqaPipeline::from_config(config).await?;

    match command {
        Commands::Index {
            file,
            document_id,
            strategy,
        } => index(&pipeline, &file, document_id, strategy, output).await,
        Commands::Search {
            query,
            top_k,
            threshold,
        } => search(&pipeline, query, top_k, threshold, output).await,
        Commands::Ask {
            question,
            stream,
            no_sources,
            top_k,
        } => {
            let mut request = QuestionRequest::new(question);
            request.include_sources = !no_sources;
            request.stream = stream;
            request.top_k = top_k;
            if stream {
                ask_stream(&pipeline, request, output).await
            } else {
                ask(&pipeline, request, output).await
            }
        }
        Commands::Stats => stats(&pipeline, output).await,
        Commands::Delete { document_id } => delete(&pipeline, &document_id, output).await,
        Commands::Rebuild => {
            let report = pipeline.rebuild_index().await?;
            output.success(&format!(
                "Rebuilt index: {} removed, {} remaining",
                report.removed, report.remaining
            ));
            if report.training.is_some() {
                output.info("Index retrained on the remaining vectors");
            }
            Ok(())
        }
        Commands::Config => show_config(config, output),
    }
}

fn show_config(config: &DocqaConfig, output: &Output) -> Result<()> {
    let rendered = config
        .to_toml()
        .map_err(|e| AppError::Configuration(e.to_string()))?;
    output.header("Effective configuration");
    output.kv("index directory", &config.index_dir().display().to_string());
    output.newline();
    println!("{}", rendered);
    Ok(())
}

async fn index(
    pipeline: &DocqaPipeline,
    file: &Path,
    document_id: Option<String>,
    strategy: Option<String>,
    output: &Output,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| AppError::InvalidInput(format!("Cannot read {}: {}", file.display(), e)))?;
    let document_id = match document_id {
        Some(id) => id,
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::InvalidInput("Cannot derive a document id from the file name".into()))?,
    };

    let response = pipeline
        .index_document(IndexRequest {
            document_id,
            text,
            chunking_strategy: strategy,
        })
        .await?;

    output.success(&format!(
        "Indexed '{}' as {} chunks ({})",
        response.document_id, response.chunks_created, response.strategy
    ));
    if let (Some(first), Some(last)) = (response.vector_ids.first(), response.vector_ids.last()) {
        output.kv("slots", &format!("{}..={}", first, last));
    }
    if let Some(training) = &response.training {
        output.info(&format!(
            "Index trained on this document: {} lists from {} vectors",
            training.lists, training.training_vectors
        ));
        if training.is_degraded() {
            output.warning("Fewer vectors than requested lists; search recall may be degraded for all future documents");
        }
    }
    output.timing(&[
        ("chunking", response.timing.chunking_ms),
        ("embedding", response.timing.embedding_ms),
        ("indexing", response.timing.indexing_ms),
        ("total", response.timing.total_ms),
    ]);
    Ok(())
}

async fn search(
    pipeline: &DocqaPipeline,
    query: String,
    top_k: Option<usize>,
    threshold: Option<f32>,
    output: &Output,
) -> Result<()> {
    let response = pipeline
        .search(SearchRequest {
            query,
            top_k,
            similarity_threshold: threshold,
        })
        .await?;

    output.header(&format!("{} results for \"{}\"", response.results_count, response.query));
    for (rank, item) in response.results.iter().enumerate() {
        output.search_hit(rank + 1, item.similarity, &item.document_id, item.chunk_index, &item.text);
    }
    if response.results.is_empty() {
        output.hint("Nothing above the similarity threshold; try --threshold with a lower value");
    }
    output.timing(&[
        ("embedding", response.timing.embedding_ms),
        ("search", response.timing.search_ms),
        ("total", response.timing.total_ms),
    ]);
    Ok(())
}

async fn ask(pipeline: &DocqaPipeline, request: QuestionRequest, output: &Output) -> Result<()> {
    let include_sources = request.include_sources;
    let response = pipeline.ask(request).await?;

    output.answer(&response.answer);
    if !response.has_answer {
        output.hint("No indexed chunk was similar enough to the question");
    }
    if include_sources && !response.citations.is_empty() {
        output.header("Sources");
        for citation in &response.citations {
            output.citation(citation);
        }
    }
    output.timing(&[
        ("retrieval", response.timing.retrieval_ms),
        ("generation", response.timing.generation_ms),
        ("total", response.timing.total_ms),
    ]);
    Ok(())
}

async fn ask_stream(pipeline: &DocqaPipeline, request: QuestionRequest, output: &Output) -> Result<()> {
    let include_sources = request.include_sources;
    let mut events = pipeline.ask_stream(request).await?;
    let mut accumulator = AnswerAccumulator::new();

    output.newline();
    while let Some(event) = events.next().await {
        let event = event?;
        match &event {
            AnswerEvent::Sources(sources) => {
                output.info(&format!("{} sources retrieved", sources.len()));
                output.newline();
            }
            AnswerEvent::Text(fragment) => output.fragment(fragment),
            AnswerEvent::NoContext(answer) => output.answer(answer),
        }
        accumulator.push(event);
    }
    output.newline();

    let answer = accumulator.finish(pipeline.synthesizer().citation_extractor());
    if include_sources && !answer.citations.is_empty() {
        output.header("Sources");
        for citation in &answer.citations {
            output.citation(citation);
        }
    }
    Ok(())
}

async fn stats(pipeline: &DocqaPipeline, output: &Output) -> Result<()> {
    let stats = pipeline.stats().await?;
    output.header("Index statistics");
    output.kv("embedding model", &stats.embedding_model);
    output.kv("dimension", &stats.dimension.to_string());
    output.kv("index type", &stats.index_type);
    output.kv("metric", &stats.metric);
    output.kv("trained", &stats.is_trained.to_string());
    output.kv("vectors", &stats.total_vectors.to_string());
    output.kv("live chunks", &stats.total_chunks.to_string());
    output.kv("tombstoned", &stats.tombstoned.to_string());
    output.kv("documents", &stats.total_documents.to_string());
    output.kv("next slot", &stats.next_slot_id.to_string());
    Ok(())
}

async fn delete(pipeline: &DocqaPipeline, document_id: &str, output: &Output) -> Result<()> {
    let response = pipeline.delete_document(document_id).await?;
    match response.outcome {
        DeleteOutcome::Tombstoned { slots } if slots.is_empty() => {
            output.warning(&format!("No indexed chunks found for '{}'", document_id));
        }
        DeleteOutcome::Tombstoned { slots } => {
            output.success(&format!(
                "Removed '{}' from search ({} vectors)",
                document_id,
                slots.len()
            ));
            output.hint("Run `docqa rebuild` to reclaim the space");
        }
        DeleteOutcome::Unsupported { matching_slots } => {
            output.warning(&format!(
                "Delete is disabled by vector.delete_policy = \"report\"; {} vectors of '{}' remain searchable",
                matching_slots, document_id
            ));
        }
    }
    Ok(())
}
