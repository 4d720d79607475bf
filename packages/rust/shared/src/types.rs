//! Core domain types shared by the wire layer, the assembler, and the formatter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one in-flight generation request (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-sortable request identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// One part of a streamed fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentPart {
    pub text: String,
    /// Explicit channel tag from the provider, when it sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl FragmentPart {
    /// An untagged part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thought: None,
        }
    }

    /// A part explicitly tagged as reasoning (`true`) or answer (`false`).
    pub fn tagged(text: impl Into<String>, thought: bool) -> Self {
        Self {
            text: text.into(),
            thought: Some(thought),
        }
    }
}

/// One incremental unit of model output, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFragment {
    /// Arrival position within the request, starting at 0.
    pub sequence_index: u64,
    pub parts: Vec<FragmentPart>,
    /// Grounding metadata attached to this fragment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ResponseFragment {
    /// Build an untagged fragment from plain part texts.
    pub fn from_texts<I, S>(sequence_index: u64, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sequence_index,
            parts: texts.into_iter().map(FragmentPart::text).collect(),
            grounding: None,
            finish_reason: None,
        }
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// All part texts concatenated in order.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }

    /// Whether any part carries an explicit channel tag.
    pub fn has_channel_tags(&self) -> bool {
        self.parts.iter().any(|p| p.thought.is_some())
    }
}

// ---------------------------------------------------------------------------
// Grounding
// ---------------------------------------------------------------------------

/// An external reference (a "chunk") the answer is attributed to.
///
/// Its display index is not stored: it is always the source's position in
/// the source list plus one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

impl GroundingSource {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
        }
    }
}

/// A character range of the answer (a "support") plus the sources it cites.
///
/// Offsets count Unicode scalar values in the unannotated answer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSpan {
    pub start_offset: usize,
    pub end_offset: usize,
    /// Zero-based positions into the source list.
    pub source_indices: Vec<usize>,
    #[serde(default)]
    pub segment_text: String,
}

impl GroundingSpan {
    pub fn new(
        start_offset: usize,
        end_offset: usize,
        source_indices: impl Into<Vec<usize>>,
        segment_text: impl Into<String>,
    ) -> Self {
        Self {
            start_offset,
            end_offset,
            source_indices: source_indices.into(),
            segment_text: segment_text.into(),
        }
    }
}

/// Unit the span offsets were measured in by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// Bytes of the UTF-8 encoding.
    Utf8Bytes,
}

/// Sources and spans delivered alongside a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingMetadata {
    pub sources: Vec<GroundingSource>,
    pub spans: Vec<GroundingSpan>,
    #[serde(default)]
    pub offset_unit: OffsetUnit,
}

impl GroundingMetadata {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.spans.is_empty()
    }
}

/// One entry of the rendered source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// 1-based citation number.
    pub display_index: usize,
    pub title: String,
    pub uri: String,
    /// Segment texts of the spans citing this source, in text order.
    pub excerpts: Vec<String>,
}

/// Answer text with markers spliced in, plus the sources it cites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedMessage {
    pub body: String,
    pub source_list: Vec<SourceEntry>,
}

/// How inline citation markers are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    /// `[n]`
    #[default]
    Bracket,
    /// `<sup>[n]</sup>`
    Superscript,
}

impl MarkerStyle {
    pub fn render(self, display_index: usize) -> String {
        match self {
            Self::Bracket => format!("[{display_index}]"),
            Self::Superscript => format!("<sup>[{display_index}]</sup>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A conversation message as exchanged with the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink events
// ---------------------------------------------------------------------------

/// Progress update shown by the host while a request runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub description: String,
    pub done: bool,
}

/// Append-only content increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMetadata {
    /// RFC 3339 timestamp.
    pub date_accessed: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationSource {
    pub name: String,
    pub url: String,
}

/// One cited source, as the host's citation panel expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationEvent {
    pub document: Vec<String>,
    pub metadata: Vec<CitationMetadata>,
    pub source: CitationSource,
}

/// Everything the pipeline pushes to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status(StatusEvent),
    Message(MessageEvent),
    Citation(CitationEvent),
}

impl PipelineEvent {
    pub fn status(description: impl Into<String>, done: bool) -> Self {
        Self::Status(StatusEvent {
            description: description.into(),
            done,
        })
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::Message(MessageEvent {
            content: content.into(),
        })
    }
}
