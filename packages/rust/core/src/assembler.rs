//! Incremental assembly of one streamed response.
//!
//! The assembler owns everything that is per-request: the thinking state
//! machine, the accumulated answer, the last grounding metadata and the
//! counters. A fresh [`StreamAssembler`] is built for every request, so
//! concurrent requests never share state.
//!
//! Display output is append-only. Each accepted fragment yields a delta that
//! is also pushed to the sink as a message event; the annotated message is
//! only produced by [`StreamAssembler::finish`], once the whole answer is
//! known.

use std::fmt;

use chrono::Utc;
use tracing::{debug, info, warn};

use citeweave_shared::{
    AnnotatedMessage, CiteweaveError, FragmentPart, GroundingMetadata, PipelineConfig,
    PipelineEvent, RequestId, ResponseFragment, SourceEntry,
};

use crate::grounding::{annotate_with, normalize_offsets};
use crate::sink::EventSink;
use crate::sources::{citation_events, render_source_block};

const REASONING_CLOSE: &str = "\n\n</details>\n\n";

// ---------------------------------------------------------------------------
// Request classification
// ---------------------------------------------------------------------------

/// How a request is expected to respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Grounded search; the response may carry sources and spans.
    Search,
    /// The model answers with a reasoning channel first.
    Thinking,
    Plain,
}

/// Identity and mode of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    /// Model id with any provider prefix and the search suffix removed.
    pub model: String,
    pub mode: GenerationMode,
}

impl RequestContext {
    /// Classify `model_id`.
    ///
    /// A leading `provider.` segment is removed when it is a plain name
    /// (letters and `_` only), so version dots in ids like `gemini-2.0-flash`
    /// are left alone. A trailing search suffix selects
    /// [`GenerationMode::Search`] and is removed; a model listed in
    /// `thinking_models`, with or without its prefix, selects
    /// [`GenerationMode::Thinking`].
    pub fn for_model(model_id: &str, config: &PipelineConfig) -> Self {
        let bare = match model_id.split_once('.') {
            Some((prefix, rest)) if is_provider_prefix(prefix) => rest,
            _ => model_id,
        };

        let (model, mode) = match bare.strip_suffix(config.search_suffix.as_str()) {
            Some(stripped) if !stripped.is_empty() => (stripped, GenerationMode::Search),
            _ if config
                .thinking_models
                .iter()
                .any(|m| m == bare || m == model_id) =>
            {
                (bare, GenerationMode::Thinking)
            }
            _ => (bare, GenerationMode::Plain),
        };

        Self {
            id: RequestId::new(),
            model: model.to_string(),
            mode,
        }
    }
}

fn is_provider_prefix(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

// ---------------------------------------------------------------------------
// Thinking state
// ---------------------------------------------------------------------------

/// Progress through the reasoning channel. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThinkingState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for ThinkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Mutable per-request state.
#[derive(Debug, Default)]
struct RequestState {
    thinking: ThinkingState,
    /// Unannotated answer text; span offsets refer to this.
    answer: String,
    /// Reasoning block as displayed, open and close tags included.
    reasoning: String,
    /// Last grounding metadata seen.
    grounding: Option<GroundingMetadata>,
    fragments: u64,
    parse_errors: usize,
    degraded_fragments: usize,
    /// Set once the provider has reported a finish reason.
    finish_seen: bool,
    /// Set once any part carried an explicit channel tag; from then on
    /// untagged parts are answer text.
    channel_tags: bool,
}

impl RequestState {
    fn advance(&mut self, next: ThinkingState) {
        if next > self.thinking {
            self.thinking = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Result of a successfully finished stream, before final formatting.
#[derive(Debug, Clone)]
pub struct AssembledMessage {
    pub request_id: RequestId,
    /// Reasoning block, annotated answer and rendered source list.
    pub content: String,
    /// Unannotated answer text.
    pub answer_text: String,
    pub annotated: AnnotatedMessage,
    pub thinking_state: ThinkingState,
    pub fragments: u64,
    pub parse_errors: usize,
    pub degraded_fragments: usize,
}

impl AssembledMessage {
    pub fn source_list(&self) -> &[SourceEntry] {
        &self.annotated.source_list
    }
}

/// Folds fragments of one request into display deltas and a final message.
pub struct StreamAssembler<'s> {
    context: RequestContext,
    config: PipelineConfig,
    sink: &'s dyn EventSink,
    state: RequestState,
    /// Length of the current delta already pushed to the sink.
    flushed: usize,
}

impl<'s> StreamAssembler<'s> {
    /// Start a request. Emits the start status for its mode.
    pub fn new(context: RequestContext, config: &PipelineConfig, sink: &'s dyn EventSink) -> Self {
        let description = match context.mode {
            GenerationMode::Search => &config.status.searching,
            GenerationMode::Thinking => &config.status.thinking,
            GenerationMode::Plain => &config.status.generating,
        };
        sink.emit(PipelineEvent::status(description.clone(), false));
        debug!(request_id = %context.id, mode = ?context.mode, "request started");

        Self {
            context,
            config: config.clone(),
            sink,
            state: RequestState::default(),
            flushed: 0,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn thinking_state(&self) -> ThinkingState {
        self.state.thinking
    }

    /// Accumulated answer text so far.
    pub fn answer_text(&self) -> &str {
        &self.state.answer
    }

    pub fn fragments(&self) -> u64 {
        self.state.fragments
    }

    /// Whether the provider signalled the end of its output.
    pub fn finish_seen(&self) -> bool {
        self.state.finish_seen
    }

    /// Fold one fragment in and return its display delta.
    pub fn accept(&mut self, fragment: ResponseFragment) -> String {
        self.state.fragments += 1;
        self.flushed = 0;
        if fragment.has_channel_tags() && !self.state.channel_tags {
            debug!(sequence_index = fragment.sequence_index, "provider sends channel tags");
            self.state.channel_tags = true;
        }
        let ResponseFragment {
            sequence_index,
            parts,
            grounding,
            finish_reason,
        } = fragment;

        if let Some(metadata) = grounding.filter(|m| !m.is_empty()) {
            debug!(
                sequence_index,
                sources = metadata.sources.len(),
                spans = metadata.spans.len(),
                "grounding metadata received"
            );
            self.state.grounding = Some(metadata);
        }
        if let Some(reason) = &finish_reason {
            debug!(sequence_index, %reason, "finish reason received");
            self.state.finish_seen = true;
        }

        let mut delta = String::new();
        if parts.is_empty() {
            return delta;
        }

        if self.state.channel_tags {
            self.route_tagged(&parts, &mut delta);
        } else if self.thinking_active() {
            match parts.as_slice() {
                [reasoning] => self.push_reasoning(&reasoning.text, &mut delta),
                [reasoning, answer] => {
                    self.push_reasoning(&reasoning.text, &mut delta);
                    self.end_reasoning(&mut delta);
                    self.push_answer(&answer.text, &mut delta);
                }
                _ => {
                    self.state.degraded_fragments += 1;
                    warn!(
                        sequence_index,
                        parts = parts.len(),
                        "fragment has more parts than the reasoning layout allows, treating as answer"
                    );
                    self.push_answer(&concat(&parts), &mut delta);
                }
            }
        } else {
            self.push_answer(&concat(&parts), &mut delta);
        }

        self.flush(&delta);
        delta
    }

    /// Record a fragment that failed to parse and return the inline notice.
    ///
    /// The notice goes to the display stream only; it never becomes part of
    /// the answer text.
    pub fn reject(&mut self, error: &CiteweaveError) -> String {
        self.state.parse_errors += 1;
        warn!(request_id = %self.context.id, error = %error, "skipping malformed fragment");
        let notice = format!("\n\n> ⚠️ Error parsing stream: {error}\n\n");
        self.sink.emit(PipelineEvent::message(notice.clone()));
        notice
    }

    /// Finish a stream that ended normally.
    ///
    /// Closes a reasoning block left open, annotates the answer, appends the
    /// source list, pushes citation events and the success status.
    pub fn finish(mut self) -> AssembledMessage {
        self.flushed = 0;
        let mut delta = String::new();
        if self.state.thinking == ThinkingState::InProgress {
            self.end_reasoning(&mut delta);
        }

        let annotated = match &self.state.grounding {
            Some(metadata) if !metadata.spans.is_empty() => {
                let spans =
                    normalize_offsets(&self.state.answer, &metadata.spans, metadata.offset_unit);
                annotate_with(
                    &self.state.answer,
                    &spans,
                    &metadata.sources,
                    self.config.marker_style,
                )
            }
            _ => AnnotatedMessage {
                body: self.state.answer.clone(),
                source_list: Vec::new(),
            },
        };

        let mut content = format!("{}{}", self.state.reasoning, annotated.body);
        if self.config.show_search_info && !annotated.source_list.is_empty() {
            let block =
                render_source_block(&annotated.source_list, &self.config.status.sources_label);
            content.push_str("\n\n");
            content.push_str(&block);
            delta.push_str("\n\n");
            delta.push_str(&block);
        }
        self.flush(&delta);

        if self.config.emit_citations {
            for citation in citation_events(&annotated.source_list, Utc::now()) {
                self.sink.emit(PipelineEvent::Citation(citation));
            }
        }

        self.sink
            .emit(PipelineEvent::status(self.config.status.succeeded.clone(), true));
        info!(
            request_id = %self.context.id,
            fragments = self.state.fragments,
            cited_sources = annotated.source_list.len(),
            parse_errors = self.state.parse_errors,
            degraded = self.state.degraded_fragments,
            "generation succeeded"
        );

        AssembledMessage {
            request_id: self.context.id,
            content,
            answer_text: self.state.answer,
            annotated,
            thinking_state: self.state.thinking,
            fragments: self.state.fragments,
            parse_errors: self.state.parse_errors,
            degraded_fragments: self.state.degraded_fragments,
        }
    }

    /// Abort the request on a terminal error.
    ///
    /// Closes an open reasoning block, pushes one error line and the failure
    /// status. Returns the final display delta.
    pub fn fail(mut self, error: &CiteweaveError) -> String {
        let mut delta = String::new();
        if self.state.thinking == ThinkingState::InProgress {
            delta.push_str(REASONING_CLOSE);
            self.state.reasoning.push_str(REASONING_CLOSE);
        }
        if self.state.fragments > 0 && !delta.ends_with('\n') {
            delta.push_str("\n\n");
        }
        delta.push_str(&format!("Error: {error}"));

        self.sink.emit(PipelineEvent::message(delta.clone()));
        self.sink
            .emit(PipelineEvent::status(self.config.status.failed.clone(), true));
        warn!(
            request_id = %self.context.id,
            fragments = self.state.fragments,
            error = %error,
            "generation failed"
        );
        delta
    }

    fn thinking_active(&self) -> bool {
        self.context.mode == GenerationMode::Thinking
            && self.state.thinking != ThinkingState::Completed
    }

    /// Push the part of `delta` not yet sent as one message event.
    fn flush(&mut self, delta: &str) {
        if delta.len() > self.flushed {
            self.sink
                .emit(PipelineEvent::message(&delta[self.flushed..]));
            self.flushed = delta.len();
        }
    }

    /// Parts go to the channel their tag names; untagged parts are answer.
    fn route_tagged(&mut self, parts: &[FragmentPart], delta: &mut String) {
        for part in parts {
            if part.thought == Some(true) {
                if self.state.thinking == ThinkingState::Completed {
                    debug!("dropping reasoning part after reasoning ended");
                    continue;
                }
                self.push_reasoning(&part.text, delta);
            } else {
                if self.state.thinking == ThinkingState::InProgress {
                    self.end_reasoning(delta);
                }
                self.push_answer(&part.text, delta);
            }
        }
    }

    fn push_reasoning(&mut self, text: &str, delta: &mut String) {
        if self.state.thinking == ThinkingState::NotStarted {
            let open = format!(
                "<details type=\"reasoning\">\n<summary>{}</summary>\n\n",
                self.config.status.reasoning_label
            );
            self.state.reasoning.push_str(&open);
            delta.push_str(&open);
            self.state.advance(ThinkingState::InProgress);
        }

        let text = if self.config.filter_thinking_tags {
            text.replace("<thinking>", "").replace("</thinking>", "")
        } else {
            text.to_string()
        };
        self.state.reasoning.push_str(&text);
        delta.push_str(&text);
    }

    /// Close the reasoning block and announce it, once.
    fn end_reasoning(&mut self, delta: &mut String) {
        if self.state.thinking != ThinkingState::InProgress {
            return;
        }
        self.state.reasoning.push_str(REASONING_CLOSE);
        delta.push_str(REASONING_CLOSE);
        self.state.advance(ThinkingState::Completed);
        // The closed block reaches the host before the status does.
        self.flush(delta);
        self.sink.emit(PipelineEvent::status(
            self.config.status.thinking_ended.clone(),
            false,
        ));
        debug!(request_id = %self.context.id, "reasoning ended");
    }

    fn push_answer(&mut self, text: &str, delta: &mut String) {
        self.state.answer.push_str(text);
        delta.push_str(text);
    }
}

fn concat(parts: &[FragmentPart]) -> String {
    parts.iter().map(|p| p.text.as_str()).collect()
}
