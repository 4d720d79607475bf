//! Stream assembly, grounding annotation, and the request pipeline.

pub mod assembler;
pub mod grounding;
pub mod pipeline;
pub mod sink;
pub mod sources;

pub use assembler::{
    AssembledMessage, GenerationMode, RequestContext, StreamAssembler, ThinkingState,
};
pub use grounding::{annotate, annotate_with, normalize_offsets};
pub use pipeline::{FinalMessage, run_response, run_stream};
pub use sink::{CollectingSink, EventSink};
pub use sources::{citation_events, render_source_block};
