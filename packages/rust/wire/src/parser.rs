//! Gemini response payload parser.
//!
//! Maps one `generateContent` / `streamGenerateContent` response object onto a
//! [`ResponseFragment`]:
//! - `candidates[0].content.parts[]` → fragment parts (`thought` kept as channel tag)
//! - `candidates[0].groundingMetadata.groundingChunks[].web` → sources
//! - `candidates[0].groundingMetadata.groundingSupports[]` → spans
//!
//! Span offsets are reported by the provider in UTF-8 bytes.

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use citeweave_shared::{
    CiteweaveError, FragmentPart, GroundingMetadata, GroundingSource, GroundingSpan, OffsetUnit,
    ResponseFragment, Result,
};

/// Title used when a chunk carries neither a title nor a parseable URI.
const UNKNOWN_SOURCE_TITLE: &str = "Unknown source";

/// URI used when a chunk carries no URI.
const MISSING_URI: &str = "#";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    grounding_metadata: Option<WireGroundingMetadata>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Option<Vec<WirePart>>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<WireChunk>,
    #[serde(default)]
    grounding_supports: Vec<WireSupport>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    web: Option<WireWeb>,
}

#[derive(Debug, Deserialize)]
struct WireWeb {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSupport {
    #[serde(default)]
    segment: Option<WireSegment>,
    #[serde(default)]
    grounding_chunk_indices: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    #[serde(default)]
    start_index: Option<i64>,
    #[serde(default)]
    end_index: Option<i64>,
    #[serde(default)]
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one response object into a fragment numbered `sequence_index`.
pub fn parse_chunk(raw: &str, sequence_index: u64) -> Result<ResponseFragment> {
    let response: WireResponse = serde_json::from_str(raw)
        .map_err(|e| CiteweaveError::parse(format!("invalid response JSON: {e}")))?;

    if let Some(error) = response.error {
        return Err(CiteweaveError::HttpStatus {
            status: error.code.unwrap_or(500),
            body: error.message.unwrap_or_default(),
        });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| CiteweaveError::parse("response has no candidates"))?;

    let grounding = candidate.grounding_metadata.map(convert_grounding);
    let finish_reason = candidate.finish_reason;

    let wire_parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
    let mut parts = Vec::with_capacity(wire_parts.len());
    for (i, part) in wire_parts.into_iter().enumerate() {
        let text = part
            .text
            .ok_or_else(|| CiteweaveError::parse(format!("part {i} has no text")))?;
        parts.push(FragmentPart {
            text,
            thought: part.thought,
        });
    }

    if parts.is_empty() && grounding.is_none() && finish_reason.is_none() {
        return Err(CiteweaveError::parse("candidate has no content parts"));
    }

    debug!(
        sequence_index,
        parts = parts.len(),
        grounded = grounding.is_some(),
        "parsed response chunk"
    );

    Ok(ResponseFragment {
        sequence_index,
        parts,
        grounding,
        finish_reason,
    })
}

fn convert_grounding(wire: WireGroundingMetadata) -> GroundingMetadata {
    let sources = wire
        .grounding_chunks
        .into_iter()
        .map(|chunk| match chunk.web {
            Some(web) => source_from_web(web),
            None => GroundingSource::new(UNKNOWN_SOURCE_TITLE, MISSING_URI),
        })
        .collect();

    let spans = wire
        .grounding_supports
        .into_iter()
        .filter_map(convert_support)
        .collect();

    GroundingMetadata {
        sources,
        spans,
        offset_unit: OffsetUnit::Utf8Bytes,
    }
}

fn source_from_web(web: WireWeb) -> GroundingSource {
    let uri = web
        .uri
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| MISSING_URI.to_string());

    let title = web
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            Url::parse(&uri)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| UNKNOWN_SOURCE_TITLE.to_string());

    GroundingSource { title, uri }
}

fn convert_support(support: WireSupport) -> Option<GroundingSpan> {
    let Some(segment) = support.segment else {
        warn!("grounding support without segment, dropping");
        return None;
    };

    let end_offset = match segment.end_index {
        Some(end) if end >= 0 => end as usize,
        other => {
            warn!(end_index = ?other, "grounding support with invalid end index, dropping");
            return None;
        }
    };
    // Zero start indices are omitted on the wire.
    let start_offset = segment.start_index.unwrap_or(0).max(0) as usize;

    let source_indices = support
        .grounding_chunk_indices
        .into_iter()
        .filter_map(|i| usize::try_from(i).ok())
        .collect();

    Some(GroundingSpan {
        start_offset,
        end_offset,
        source_indices,
        segment_text: segment.text.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_text_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"}}]}"#;
        let fragment = parse_chunk(raw, 4).unwrap();
        assert_eq!(fragment.sequence_index, 4);
        assert_eq!(fragment.part_count(), 1);
        assert_eq!(fragment.text(), "Hello");
        assert!(fragment.grounding.is_none());
    }

    #[test]
    fn parse_keeps_thought_tags() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"text":"pondering","thought":true},
            {"text":"answer"}
        ]}}]}"#;
        let fragment = parse_chunk(raw, 0).unwrap();
        assert!(fragment.has_channel_tags());
        assert_eq!(fragment.parts[0].thought, Some(true));
        assert_eq!(fragment.parts[1].thought, None);
    }

    #[test]
    fn parse_grounding_metadata() {
        let raw = r#"{"candidates":[{
            "content":{"parts":[{"text":"Rust is fast."}]},
            "finishReason":"STOP",
            "groundingMetadata":{
                "groundingChunks":[
                    {"web":{"uri":"https://a.example/x","title":"a.example"}},
                    {"web":{"uri":"https://b.example/y"}},
                    {}
                ],
                "groundingSupports":[
                    {"segment":{"endIndex":4,"text":"Rust"},"groundingChunkIndices":[0,1]},
                    {"segment":{"startIndex":5,"endIndex":13,"text":"is fast."},"groundingChunkIndices":[2,-1]},
                    {"segment":{"startIndex":1},"groundingChunkIndices":[0]}
                ]
            }
        }]}"#;
        let fragment = parse_chunk(raw, 0).unwrap();
        assert_eq!(fragment.finish_reason.as_deref(), Some("STOP"));

        let grounding = fragment.grounding.unwrap();
        assert_eq!(grounding.offset_unit, OffsetUnit::Utf8Bytes);
        assert_eq!(grounding.sources.len(), 3);
        assert_eq!(grounding.sources[0].title, "a.example");
        // Missing title falls back to the host.
        assert_eq!(grounding.sources[1].title, "b.example");
        assert_eq!(grounding.sources[2].title, UNKNOWN_SOURCE_TITLE);
        assert_eq!(grounding.sources[2].uri, MISSING_URI);

        // The support without an end index is dropped.
        assert_eq!(grounding.spans.len(), 2);
        assert_eq!(grounding.spans[0].start_offset, 0);
        assert_eq!(grounding.spans[0].end_offset, 4);
        assert_eq!(grounding.spans[0].source_indices, vec![0, 1]);
        assert_eq!(grounding.spans[1].source_indices, vec![2]);
        assert_eq!(grounding.spans[1].segment_text, "is fast.");
    }

    #[test]
    fn metadata_only_chunk_is_valid() {
        let raw = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        let fragment = parse_chunk(raw, 9).unwrap();
        assert_eq!(fragment.part_count(), 0);
        assert_eq!(fragment.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn missing_fields_are_parse_errors() {
        assert!(matches!(
            parse_chunk("not json", 0),
            Err(CiteweaveError::Parse { .. })
        ));
        assert!(matches!(
            parse_chunk(r#"{"candidates":[]}"#, 0),
            Err(CiteweaveError::Parse { .. })
        ));
        assert!(matches!(
            parse_chunk(r#"{"candidates":[{"content":{}}]}"#, 0),
            Err(CiteweaveError::Parse { .. })
        ));
        assert!(matches!(
            parse_chunk(r#"{"candidates":[{"content":{"parts":[{"inlineData":{}}]}}]}"#, 0),
            Err(CiteweaveError::Parse { .. })
        ));
    }

    #[test]
    fn provider_error_maps_to_status() {
        let raw = r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = parse_chunk(raw, 0).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "HTTP 429: Resource exhausted");
    }
}
