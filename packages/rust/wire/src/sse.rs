//! Server-sent-events reader for streamed responses.
//!
//! Each event's `data:` lines are joined and parsed as one response chunk.
//! `event:`, `id:`, and comment lines are ignored; `[DONE]` sentinels are skipped.
//! An event cut off by the end of the body is a closed stream unless its
//! data still parses.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::trace;

use citeweave_shared::{CiteweaveError, ResponseFragment, Result};

use crate::FragmentSource;
use crate::parser::parse_chunk;

/// Yields one fragment per SSE event read from `R`.
pub struct SseFragmentSource<R> {
    lines: Lines<R>,
    next_index: u64,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> SseFragmentSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            next_index: 0,
            finished: false,
        }
    }

    /// Read lines until one event's data is buffered. The flag is false when
    /// the body ended before the event's terminating blank line.
    async fn next_event(&mut self) -> Option<Result<(String, bool)>> {
        let mut data_lines: Vec<String> = Vec::new();
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return (!data_lines.is_empty()).then(|| Ok((data_lines.join("\n"), false)));
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(CiteweaveError::Network(format!(
                        "failed reading event stream: {e}"
                    ))));
                }
            };

            if line.trim().is_empty() {
                if data_lines.is_empty() {
                    continue;
                }
                return Some(Ok((data_lines.join("\n"), true)));
            }

            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim_start().to_string());
            } else {
                trace!(%line, "ignoring non-data line");
            }
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> FragmentSource for SseFragmentSource<R> {
    async fn next_fragment(&mut self) -> Option<Result<ResponseFragment>> {
        while !self.finished {
            let (data, terminated) = match self.next_event().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };
            if data.trim() == "[DONE]" {
                continue;
            }
            let index = self.next_index;
            self.next_index += 1;
            return Some(match parse_chunk(&data, index) {
                Err(CiteweaveError::Parse { message }) if !terminated => {
                    Err(CiteweaveError::StreamClosed(format!(
                        "event stream ended inside an event: {message}"
                    )))
                }
                parsed => parsed,
            });
        }
        None
    }
}
