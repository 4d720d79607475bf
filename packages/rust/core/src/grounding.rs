//! Citation marker splicing.
//!
//! Span offsets are measured against the unannotated answer. Markers are
//! spliced strictly by descending end offset, so every splice happens to the
//! right of all offsets still waiting to be consumed.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use citeweave_shared::{
    AnnotatedMessage, GroundingSource, GroundingSpan, MarkerStyle, OffsetUnit, SourceEntry,
};

/// A span resolved against the text and the source list.
struct Placement<'a> {
    input_index: usize,
    start: usize,
    end: usize,
    /// Valid zero-based source positions, deduplicated, in input order.
    refs: Vec<usize>,
    segment_text: &'a str,
}

/// Annotate `text` with `[n]` markers.
pub fn annotate(
    text: &str,
    spans: &[GroundingSpan],
    sources: &[GroundingSource],
) -> AnnotatedMessage {
    annotate_with(text, spans, sources, MarkerStyle::Bracket)
}

/// Annotate `text`, rendering markers in `style`.
///
/// Sources are numbered by position, starting at 1. References outside the
/// source list are dropped, end offsets past the text are clamped to its
/// length, and a span left without any valid reference adds no marker.
#[instrument(skip_all, fields(spans = spans.len(), sources = sources.len()))]
pub fn annotate_with(
    text: &str,
    spans: &[GroundingSpan],
    sources: &[GroundingSource],
    style: MarkerStyle,
) -> AnnotatedMessage {
    if spans.is_empty() {
        return AnnotatedMessage {
            body: text.to_string(),
            source_list: Vec::new(),
        };
    }

    // Byte position of every char boundary, indexed by char offset.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let placements: Vec<Placement<'_>> = spans
        .iter()
        .enumerate()
        .map(|(input_index, span)| resolve(input_index, span, char_len, sources.len()))
        .collect();

    // Descending end offset; ties in reversed input order so markers sharing
    // a position read in input order.
    let mut order: Vec<usize> = (0..placements.len()).collect();
    order.sort_by(|&a, &b| {
        placements[b]
            .end
            .cmp(&placements[a].end)
            .then_with(|| b.cmp(&a))
    });

    let mut body = text.to_string();
    let mut spliced = 0usize;
    for i in order {
        let placement = &placements[i];
        if placement.refs.is_empty() {
            continue;
        }
        let marker: String = placement
            .refs
            .iter()
            .map(|&r| style.render(r + 1))
            .collect();
        body.insert_str(boundaries[placement.end], &marker);
        spliced += 1;
    }

    let source_list = build_source_list(&placements, sources);

    debug!(spliced, cited_sources = source_list.len(), "answer annotated");

    AnnotatedMessage { body, source_list }
}

fn resolve<'a>(
    input_index: usize,
    span: &'a GroundingSpan,
    char_len: usize,
    source_count: usize,
) -> Placement<'a> {
    let end = span.end_offset.min(char_len);
    if end != span.end_offset {
        debug!(
            input_index,
            end_offset = span.end_offset,
            char_len,
            "clamping span end to text length"
        );
    }
    let start = span.start_offset.min(end);

    let mut refs = Vec::with_capacity(span.source_indices.len());
    for &idx in &span.source_indices {
        if idx >= source_count {
            debug!(input_index, source_index = idx, "dropping out-of-range source reference");
            continue;
        }
        if !refs.contains(&idx) {
            refs.push(idx);
        }
    }

    Placement {
        input_index,
        start,
        end,
        refs,
        segment_text: &span.segment_text,
    }
}

/// One entry per referenced source, ascending by display index, excerpts in
/// text order.
fn build_source_list(placements: &[Placement<'_>], sources: &[GroundingSource]) -> Vec<SourceEntry> {
    let mut by_source: BTreeMap<usize, Vec<&Placement<'_>>> = BTreeMap::new();
    for placement in placements {
        for &r in &placement.refs {
            by_source.entry(r).or_default().push(placement);
        }
    }

    by_source
        .into_iter()
        .map(|(idx, mut citing)| {
            citing.sort_by_key(|p| (p.start, p.end, p.input_index));
            let excerpts = citing
                .iter()
                .map(|p| p.segment_text.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            let source = &sources[idx];
            SourceEntry {
                display_index: idx + 1,
                title: source.title.clone(),
                uri: source.uri.clone(),
                excerpts,
            }
        })
        .collect()
}

/// Convert span offsets to char offsets into `text`.
///
/// Byte offsets that land inside a multi-byte character are moved back to
/// the start of that character; offsets past the end stay past the end so
/// the annotator clamps them.
pub fn normalize_offsets(text: &str, spans: &[GroundingSpan], unit: OffsetUnit) -> Vec<GroundingSpan> {
    match unit {
        OffsetUnit::Chars => spans.to_vec(),
        OffsetUnit::Utf8Bytes => {
            let to_chars = |byte: usize| -> usize {
                if byte >= text.len() {
                    return text.chars().count() + (byte - text.len());
                }
                let mut b = byte;
                while !text.is_char_boundary(b) {
                    b -= 1;
                }
                text[..b].chars().count()
            };
            spans
                .iter()
                .map(|span| GroundingSpan {
                    start_offset: to_chars(span.start_offset),
                    end_offset: to_chars(span.end_offset),
                    source_indices: span.source_indices.clone(),
                    segment_text: span.segment_text.clone(),
                })
                .collect()
        }
    }
}
