//! Final formatting of assembled assistant messages.
//!
//! A message may carry one or more `<details>` source blocks. Every source
//! block is wrapped verbatim in a literal fence so later passes and renderers
//! leave it alone, and inline citation markers (`<sup>[n]</sup>`, `[n]`) are
//! stripped from the prose around it. Formatting never fails: malformed or
//! unterminated delimiters are treated as prose.

mod cleanup;
mod inputs;
mod tokenizer;

use tracing::{debug, instrument};

use citeweave_shared::{ChatMessage, Role};

pub use inputs::{wrap_user_message, wrap_user_messages};
pub use tokenizer::{Segment, tokenize};

use tokenizer::{FENCE_CLOSE, FENCE_OPEN};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for the formatting pass.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Remove inline citation markers from prose.
    pub strip_markers: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            strip_markers: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Format one message body with default options.
pub fn format_text(message: &str) -> String {
    format_text_with(message, &FormatOptions::default())
}

/// Format one message body.
///
/// Stripping can expose a marker or a begin delimiter that was split by
/// another marker, so single passes are repeated until the text is stable.
/// This makes the result idempotent.
#[instrument(skip_all, fields(len = message.len()))]
pub fn format_text_with(message: &str, opts: &FormatOptions) -> String {
    let mut current = format_once(message, opts);
    let mut passes = 1;
    loop {
        let next = format_once(&current, opts);
        if next == current {
            break;
        }
        current = next;
        passes += 1;
    }
    debug!(passes, "message formatted");
    current
}

/// Format an assistant message; any other role passes through unchanged.
pub fn format_message(message: &ChatMessage, opts: &FormatOptions) -> ChatMessage {
    match message.role {
        Role::Assistant => ChatMessage {
            role: message.role,
            content: format_text_with(&message.content, opts),
        },
        Role::System | Role::User => message.clone(),
    }
}

/// Format every assistant message of a conversation in place.
pub fn format_conversation(messages: &mut [ChatMessage], opts: &FormatOptions) {
    for message in messages.iter_mut() {
        if message.role == Role::Assistant {
            message.content = format_text_with(&message.content, opts);
        }
    }
}

fn format_once(message: &str, opts: &FormatOptions) -> String {
    let mut out = String::with_capacity(message.len() + 16);

    for segment in tokenize(message) {
        match segment {
            Segment::Prose(text) if opts.strip_markers => {
                out.push_str(&cleanup::strip_markers(text));
            }
            Segment::Prose(text) | Segment::FencedBlock(text) | Segment::ReasoningBlock(text) => {
                out.push_str(text);
            }
            Segment::SourceBlock(block) => {
                out.push_str(FENCE_OPEN);
                out.push_str(block);
                out.push_str(FENCE_CLOSE);
            }
        }
    }

    out
}
