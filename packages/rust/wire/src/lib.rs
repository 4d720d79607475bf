//! Provider wire formats and fragment sources.
//!
//! The transport that talks to the model provider lives outside citeweave.
//! This crate covers what comes back: parsing response payloads into
//! [`ResponseFragment`]s and exposing a stream of them through the
//! [`FragmentSource`] trait the assembler consumes.

mod parser;
mod sse;

use std::future::Future;

use tokio::sync::mpsc;

use citeweave_shared::{ResponseFragment, Result};

pub use parser::parse_chunk;
pub use sse::SseFragmentSource;

/// An ordered, asynchronous supply of response fragments for one request.
///
/// `None` marks the normal end of the stream. An `Err` item is either local
/// (a fragment that failed to parse) or terminal (see
/// [`CiteweaveError::is_transport`](citeweave_shared::CiteweaveError::is_transport)).
pub trait FragmentSource {
    fn next_fragment(&mut self) -> impl Future<Output = Option<Result<ResponseFragment>>> + Send;
}

/// Fragments handed over by a transport task through a channel.
impl FragmentSource for mpsc::Receiver<Result<ResponseFragment>> {
    async fn next_fragment(&mut self) -> Option<Result<ResponseFragment>> {
        self.recv().await
    }
}

/// Parse a complete, non-streamed response body.
pub fn parse_response(body: &str) -> Result<ResponseFragment> {
    parse_chunk(body, 0)
}
