//! End-to-end drivers: fragments → assembler → annotator → formatter.

use std::time::Instant;

use tracing::{debug, info, instrument};

use citeweave_markdown::{FormatOptions, format_text_with};
use citeweave_shared::{CiteweaveError, PipelineConfig, RequestId, Result, SourceEntry};
use citeweave_wire::{FragmentSource, parse_response};

use crate::assembler::{AssembledMessage, RequestContext, StreamAssembler, ThinkingState};
use crate::sink::EventSink;

/// The user-visible result of one request.
#[derive(Debug, Clone)]
pub struct FinalMessage {
    pub request_id: RequestId,
    /// Formatted message: reasoning block, answer, fenced source list.
    pub content: String,
    /// Answer text as the model produced it, without markers.
    pub answer_text: String,
    /// Answer text with markers, before formatting.
    pub annotated_body: String,
    pub source_list: Vec<SourceEntry>,
    pub thinking_state: ThinkingState,
    pub fragments: u64,
    pub parse_errors: usize,
    pub degraded_fragments: usize,
    pub elapsed: std::time::Duration,
}

/// Drive a streamed request to completion.
///
/// Each wait for the next fragment is bounded by
/// [`PipelineConfig::fragment_timeout`]. Fragments that fail to parse are
/// reported inline and skipped; a transport error or a timeout ends the
/// request with the failure status and is returned. So does a source that
/// closes after delivering fragments but before any finish reason.
#[instrument(skip_all, fields(request_id = %request.id, model = %request.model, mode = ?request.mode))]
pub async fn run_stream<S: FragmentSource>(
    source: &mut S,
    request: RequestContext,
    config: &PipelineConfig,
    sink: &dyn EventSink,
) -> Result<FinalMessage> {
    let start = Instant::now();
    let mut assembler = StreamAssembler::new(request, config, sink);

    loop {
        let next = match tokio::time::timeout(config.fragment_timeout, source.next_fragment()).await
        {
            Ok(next) => next,
            Err(_) => {
                let err = CiteweaveError::Timeout {
                    secs: config.fragment_timeout.as_secs(),
                };
                assembler.fail(&err);
                return Err(err);
            }
        };

        match next {
            None if assembler.fragments() > 0 && !assembler.finish_seen() => {
                let err = CiteweaveError::StreamClosed(format!(
                    "source closed after {} fragments without a finish reason",
                    assembler.fragments()
                ));
                assembler.fail(&err);
                return Err(err);
            }
            None => break,
            Some(Ok(fragment)) => {
                debug!(sequence_index = fragment.sequence_index, parts = fragment.part_count(), "fragment");
                assembler.accept(fragment);
            }
            Some(Err(err)) if err.is_transport() => {
                assembler.fail(&err);
                return Err(err);
            }
            Some(Err(err)) => {
                assembler.reject(&err);
            }
        }
    }

    Ok(finalize(assembler.finish(), config, start))
}

/// Process a complete, non-streamed response body.
///
/// A body that cannot be parsed fails the request.
#[instrument(skip_all, fields(request_id = %request.id, model = %request.model, mode = ?request.mode))]
pub fn run_response(
    body: &str,
    request: RequestContext,
    config: &PipelineConfig,
    sink: &dyn EventSink,
) -> Result<FinalMessage> {
    let start = Instant::now();
    let mut assembler = StreamAssembler::new(request, config, sink);

    match parse_response(body) {
        Ok(fragment) => {
            assembler.accept(fragment);
            Ok(finalize(assembler.finish(), config, start))
        }
        Err(err) => {
            assembler.fail(&err);
            Err(err)
        }
    }
}

fn finalize(message: AssembledMessage, config: &PipelineConfig, start: Instant) -> FinalMessage {
    let opts = FormatOptions {
        strip_markers: config.strip_inline_markers,
    };
    let content = format_text_with(&message.content, &opts);
    let elapsed = start.elapsed();

    info!(
        fragments = message.fragments,
        sources = message.annotated.source_list.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "pipeline complete"
    );

    FinalMessage {
        request_id: message.request_id,
        content,
        answer_text: message.answer_text,
        annotated_body: message.annotated.body,
        source_list: message.annotated.source_list,
        thinking_state: message.thinking_state,
        fragments: message.fragments,
        parse_errors: message.parse_errors,
        degraded_fragments: message.degraded_fragments,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::sink::CollectingSink;
    use citeweave_shared::{PipelineEvent, ResponseFragment};
    use citeweave_wire::SseFragmentSource;

    fn finished(sequence_index: u64, text: &str) -> ResponseFragment {
        ResponseFragment {
            finish_reason: Some("STOP".into()),
            ..ResponseFragment::from_texts(sequence_index, [text])
        }
    }

    fn done_statuses(sink: &CollectingSink) -> Vec<String> {
        sink.statuses()
            .into_iter()
            .filter(|s| s.done)
            .map(|s| s.description)
            .collect()
    }

    #[tokio::test]
    async fn grounded_sse_stream_end_to_end() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Rust is \"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"fast.\"}]},",
            "\"finishReason\":\"STOP\",\"groundingMetadata\":{",
            "\"groundingChunks\":[{\"web\":{\"uri\":\"https://rust-lang.org\",\"title\":\"Rust\"}}],",
            "\"groundingSupports\":[{\"segment\":{\"startIndex\":0,\"endIndex\":13,\"text\":\"Rust is fast.\"},",
            "\"groundingChunkIndices\":[0]}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let mut source = SseFragmentSource::new(body.as_bytes());
        let request = RequestContext::for_model("google.gemini-2.0-flash-search", &config);

        let message = run_stream(&mut source, request, &config, &sink).await.unwrap();

        assert_eq!(message.answer_text, "Rust is fast.");
        assert_eq!(message.annotated_body, "Rust is fast.[1]");
        assert_eq!(message.source_list.len(), 1);
        // Inline markers are stripped; the source list is fenced.
        assert!(message.content.starts_with("Rust is fast.\n\n```\n<details>"));
        assert!(message.content.contains("[1] [Rust](https://rust-lang.org)"));
        assert!(message.content.ends_with("</details>\n```"));
        assert_eq!(done_statuses(&sink), vec![config.status.succeeded.clone()]);
    }

    #[tokio::test]
    async fn markers_kept_when_stripping_disabled() {
        let config = PipelineConfig {
            strip_inline_markers: false,
            ..PipelineConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let mut fragment = finished(0, "ABCDE");
        fragment.grounding = Some(citeweave_shared::GroundingMetadata {
            sources: vec![
                citeweave_shared::GroundingSource::new("X", "u1"),
                citeweave_shared::GroundingSource::new("Y", "u2"),
            ],
            spans: vec![
                citeweave_shared::GroundingSpan::new(1, 3, vec![0], "BC"),
                citeweave_shared::GroundingSpan::new(0, 1, vec![1], "A"),
            ],
            offset_unit: Default::default(),
        });
        tx.send(Ok(fragment)).await.unwrap();
        drop(tx);

        let sink = CollectingSink::new();
        let request = RequestContext::for_model("m-search", &config);
        let message = run_stream(&mut rx, request, &config, &sink).await.unwrap();
        assert!(message.content.starts_with("A[2]BC[1]DE\n\n```\n<details>"));
    }

    #[tokio::test]
    async fn malformed_fragment_is_skipped() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"one \"}]}}]}\n\n",
            "data: {not json\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"two\"}]},\"finishReason\":\"STOP\"}]}\n\n",
        );
        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let mut source = SseFragmentSource::new(body.as_bytes());
        let request = RequestContext::for_model("gemini-pro", &config);

        let message = run_stream(&mut source, request, &config, &sink).await.unwrap();
        assert_eq!(message.answer_text, "one two");
        assert_eq!(message.parse_errors, 1);
        assert!(sink.transcript().contains("Error parsing stream"));
        assert!(!message.content.contains("Error parsing stream"));
    }

    #[tokio::test]
    async fn transport_error_fails_once() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(ResponseFragment::from_texts(0, ["partial"])))
            .await
            .unwrap();
        tx.send(Err(CiteweaveError::Network("connection reset".into())))
            .await
            .unwrap();
        tx.send(Ok(ResponseFragment::from_texts(2, ["never seen"])))
            .await
            .unwrap();
        drop(tx);

        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);
        let err = run_stream(&mut rx, request, &config, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, CiteweaveError::Network(_)));
        assert_eq!(done_statuses(&sink), vec![config.status.failed.clone()]);
        let transcript = sink.transcript();
        assert!(transcript.ends_with("Error: network error: connection reset"));
        assert!(!transcript.contains("never seen"));
    }

    #[tokio::test]
    async fn source_closed_before_finish_reason_fails() {
        let (tx, mut rx) = mpsc::channel(2);
        tx.send(Ok(ResponseFragment::from_texts(0, ["partial answ"])))
            .await
            .unwrap();
        drop(tx);

        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);
        let err = run_stream(&mut rx, request, &config, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, CiteweaveError::StreamClosed(_)));
        assert!(err.is_transport());
        assert_eq!(done_statuses(&sink), vec![config.status.failed.clone()]);
        assert!(sink.transcript().contains("Error: stream closed"));
    }

    #[tokio::test]
    async fn truncated_sse_body_fails() {
        // Cut off in the middle of the second event.
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"one \"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tw",
        );
        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let mut source = SseFragmentSource::new(body.as_bytes());
        let request = RequestContext::for_model("gemini-pro", &config);

        let err = run_stream(&mut source, request, &config, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, CiteweaveError::StreamClosed(_)));
        assert_eq!(done_statuses(&sink), vec![config.status.failed.clone()]);
    }

    #[tokio::test]
    async fn empty_source_finishes_empty() {
        let (tx, mut rx) = mpsc::channel::<Result<ResponseFragment>>(1);
        drop(tx);

        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);
        let message = run_stream(&mut rx, request, &config, &sink).await.unwrap();
        assert_eq!(message.content, "");
        assert_eq!(done_statuses(&sink), vec![config.status.succeeded.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_times_out() {
        let (tx, mut rx) = mpsc::channel::<Result<ResponseFragment>>(1);
        let config = PipelineConfig {
            fragment_timeout: Duration::from_secs(3),
            ..PipelineConfig::default()
        };
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);

        let err = run_stream(&mut rx, request, &config, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, CiteweaveError::Timeout { secs: 3 }));
        assert_eq!(done_statuses(&sink), vec![config.status.failed.clone()]);
        drop(tx);
    }

    #[tokio::test]
    async fn channel_sink_receives_events_in_order() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(2);
        tx.send(Ok(finished(0, "hello")))
            .await
            .unwrap();
        drop(tx);

        let config = PipelineConfig::default();
        let request = RequestContext::for_model("gemini-pro", &config);
        run_stream(&mut rx, request, &config, &events_tx).await.unwrap();
        drop(events_tx);

        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                PipelineEvent::status(config.status.generating.clone(), false),
                PipelineEvent::message("hello"),
                PipelineEvent::status(config.status.succeeded.clone(), true),
            ]
        );
    }

    #[test]
    fn non_streamed_response() {
        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);
        let message = run_response(
            r#"{"candidates":[{"content":{"parts":[{"text":"whole answer[3]"}]}}]}"#,
            request,
            &config,
            &sink,
        )
        .unwrap();
        assert_eq!(message.answer_text, "whole answer[3]");
        assert_eq!(message.content, "whole answer");
    }

    #[test]
    fn unparseable_response_fails() {
        let config = PipelineConfig::default();
        let sink = CollectingSink::new();
        let request = RequestContext::for_model("gemini-pro", &config);
        let err = run_response("<html>502</html>", request, &config, &sink).unwrap_err();
        assert!(matches!(err, CiteweaveError::Parse { .. }));
        assert_eq!(done_statuses(&sink), vec![config.status.failed.clone()]);
    }
}
