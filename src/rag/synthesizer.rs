//! Answer synthesizer.
//!
//! Drives one question through retrieval, context assembly, generation and
//! citation extraction. The request lifecycle is modelled by [`AnswerPhase`]:
//!
//! ```text
//! Received -> Retrieving -> NoContext -> Done
//!                        -> ContextReady -> Generating -> Extracting -> Done
//! ```
//!
//! Nothing is retried here. A failure while retrieving or generating ends the
//! request and is returned to the caller.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::llm::{GenerationProvider, TokenUsage};
use crate::rag::citations::{Citation, CitationExtractor};
use crate::rag::context::{assemble, AssembledContext, SourceRef};
use crate::rag::retrieval::RetrievalCoordinator;
use crate::types::{AppError, Result};

/// Answer returned when retrieval found nothing above the floor.
pub const NO_CONTEXT_ANSWER: &str =
    "I don't have enough information in the available documents to answer this question.";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a medical AI assistant helping healthcare professionals analyze clinical documents.
Your role is to provide accurate, evidence-based answers based ONLY on the provided context.

Rules:
1. Only answer based on the provided context
2. If information is not in the context, say \"I don't have enough information\"
3. Always cite your sources with [Source X] notation
4. Be concise but comprehensive
5. Use medical terminology appropriately
6. Never make up information or hallucinate
";

pub const DEFAULT_QUESTION_TEMPLATE: &str = "Context from clinical documents:
{context}

Question: {question}

Please provide a detailed answer based on the context above. Include citations [Source X] for each fact.";

/// Instruction text sent with every question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub system: String,
    /// Must contain `{context}` and `{question}`.
    pub question_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            question_template: DEFAULT_QUESTION_TEMPLATE.to_string(),
        }
    }
}

impl PromptConfig {
    /// Fill the template. Placeholders inside the context or the question
    /// are left alone.
    pub fn render(&self, context: &str, question: &str) -> String {
        self.question_template
            .split("{context}")
            .map(|part| part.replace("{question}", question))
            .collect::<Vec<_>>()
            .join(context)
    }
}

/// Lifecycle of a single answer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerPhase {
    Received,
    Retrieving,
    NoContext,
    ContextReady,
    Generating,
    Extracting,
    Done,
}

impl AnswerPhase {
    fn can_advance_to(self, next: AnswerPhase) -> bool {
        use AnswerPhase::*;
        matches!(
            (self, next),
            (Received, Retrieving)
                | (Retrieving, NoContext)
                | (Retrieving, ContextReady)
                | (NoContext, Done)
                | (ContextReady, Generating)
                | (Generating, Extracting)
                | (Extracting, Done)
        )
    }
}

impl fmt::Display for AnswerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnswerPhase::Received => "received",
            AnswerPhase::Retrieving => "retrieving",
            AnswerPhase::NoContext => "no_context",
            AnswerPhase::ContextReady => "context_ready",
            AnswerPhase::Generating => "generating",
            AnswerPhase::Extracting => "extracting",
            AnswerPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of one request and traces every transition.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: AnswerPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        debug!(phase = %AnswerPhase::Received, "Answer request received");
        Self {
            phase: AnswerPhase::Received,
        }
    }

    pub fn phase(&self) -> AnswerPhase {
        self.phase
    }

    pub fn advance(&mut self, next: AnswerPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(AppError::Internal(format!(
                "Invalid answer transition {} -> {}",
                self.phase, next
            )));
        }
        debug!(from = %self.phase, to = %next, "Answer phase transition");
        self.phase = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a blocking answer.
#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub context: AssembledContext,
    pub has_answer: bool,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub retrieval_ms: u64,
    pub generation_ms: u64,
}

/// One event of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum AnswerEvent {
    /// Ranked sources, always the first event of a streamed answer.
    Sources(Vec<SourceRef>),
    /// Next fragment of generated text.
    Text(String),
    /// Retrieval found nothing; the only event of the stream.
    NoContext(String),
}

pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<AnswerEvent>> + Send>>;

pub struct AnswerSynthesizer {
    retrieval: RetrievalCoordinator,
    generator: Arc<dyn GenerationProvider>,
    prompts: PromptConfig,
    citations: CitationExtractor,
}

impl AnswerSynthesizer {
    pub fn new(
        retrieval: RetrievalCoordinator,
        generator: Arc<dyn GenerationProvider>,
        prompts: PromptConfig,
    ) -> Result<Self> {
        Ok(Self {
            retrieval,
            generator,
            prompts,
            citations: CitationExtractor::new()?,
        })
    }

    pub fn retrieval(&self) -> &RetrievalCoordinator {
        &self.retrieval
    }

    pub fn citation_extractor(&self) -> &CitationExtractor {
        &self.citations
    }

    pub fn prompts(&self) -> &PromptConfig {
        &self.prompts
    }

    /// Answer `question` with one blocking generation call.
    ///
    /// With no retrieved context the generator is never called and the
    /// fixed [`NO_CONTEXT_ANSWER`] is returned with `has_answer = false`.
    #[instrument(skip(self, question, query_vector))]
    pub async fn answer(
        &self,
        question: &str,
        query_vector: Vec<f32>,
        top_k: usize,
        floor: f32,
        include_sources: bool,
    ) -> Result<SynthesizedAnswer> {
        let mut tracker = PhaseTracker::new();

        tracker.advance(AnswerPhase::Retrieving)?;
        let started = Instant::now();
        let hits = self.retrieval.retrieve(query_vector, top_k, floor).await?;
        let retrieval_ms = started.elapsed().as_millis() as u64;

        if hits.is_empty() {
            tracker.advance(AnswerPhase::NoContext)?;
            tracker.advance(AnswerPhase::Done)?;
            return Ok(SynthesizedAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                context: assemble(&[]),
                has_answer: false,
                usage: None,
                model: None,
                retrieval_ms,
                generation_ms: 0,
            });
        }

        let context = assemble(&hits);
        tracker.advance(AnswerPhase::ContextReady)?;

        tracker.advance(AnswerPhase::Generating)?;
        let prompt = self.prompts.render(&context.text, question);
        let started = Instant::now();
        let generation = self.generator.generate(&self.prompts.system, &prompt).await?;
        let generation_ms = started.elapsed().as_millis() as u64;

        tracker.advance(AnswerPhase::Extracting)?;
        let citations = if include_sources {
            self.citations.extract(&generation.text, &context.sources)
        } else {
            Vec::new()
        };
        tracker.advance(AnswerPhase::Done)?;

        debug!(
            sources = context.len(),
            citations = citations.len(),
            generation_ms,
            "Answer synthesized"
        );

        Ok(SynthesizedAnswer {
            answer: generation.text,
            citations,
            context,
            has_answer: true,
            usage: Some(generation.usage),
            model: Some(generation.model),
            retrieval_ms,
            generation_ms,
        })
    }

    /// Answer `question` as an event stream.
    ///
    /// Retrieval and the start of generation happen before this returns, so
    /// an unavailable provider is reported as an error rather than a stream.
    /// Dropping the stream drops the provider stream with it.
    #[instrument(skip(self, question, query_vector))]
    pub async fn answer_stream(
        &self,
        question: &str,
        query_vector: Vec<f32>,
        top_k: usize,
        floor: f32,
    ) -> Result<AnswerStream> {
        let mut tracker = PhaseTracker::new();

        tracker.advance(AnswerPhase::Retrieving)?;
        let hits = self.retrieval.retrieve(query_vector, top_k, floor).await?;

        if hits.is_empty() {
            tracker.advance(AnswerPhase::NoContext)?;
            tracker.advance(AnswerPhase::Done)?;
            let event = AnswerEvent::NoContext(NO_CONTEXT_ANSWER.to_string());
            return Ok(Box::pin(futures::stream::once(async move { Ok(event) })));
        }

        let context = assemble(&hits);
        tracker.advance(AnswerPhase::ContextReady)?;

        tracker.advance(AnswerPhase::Generating)?;
        let prompt = self.prompts.render(&context.text, question);
        let mut fragments = self.generator.stream(&self.prompts.system, &prompt).await?;
        let sources = context.sources;

        let events = stream! {
            yield Ok(AnswerEvent::Sources(sources));
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => yield Ok(AnswerEvent::Text(text)),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            // Citations are extracted by the consumer once the text is whole.
            for phase in [AnswerPhase::Extracting, AnswerPhase::Done] {
                if let Err(e) = tracker.advance(phase) {
                    yield Err(e);
                    return;
                }
            }
            debug!("Answer stream finished");
        };

        Ok(Box::pin(events))
    }
}

/// Folds a finished [`AnswerEvent`] stream into a complete answer.
///
/// Citations are extracted only in [`AnswerAccumulator::finish`], once the
/// whole text is known.
#[derive(Debug, Default)]
pub struct AnswerAccumulator {
    sources: Vec<SourceRef>,
    text: String,
    no_context: Option<String>,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AnswerEvent) {
        match event {
            AnswerEvent::Sources(sources) => self.sources = sources,
            AnswerEvent::Text(fragment) => self.text.push_str(&fragment),
            AnswerEvent::NoContext(answer) => self.no_context = Some(answer),
        }
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self, extractor: &CitationExtractor) -> AccumulatedAnswer {
        if let Some(answer) = self.no_context {
            return AccumulatedAnswer {
                answer,
                citations: Vec::new(),
                sources: Vec::new(),
                has_answer: false,
            };
        }

        let citations = extractor.extract(&self.text, &self.sources);
        AccumulatedAnswer {
            answer: self.text,
            citations,
            sources: self.sources,
            has_answer: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub sources: Vec<SourceRef>,
    pub has_answer: bool,
}
