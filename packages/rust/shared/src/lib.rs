//! Shared types, error model, and configuration for citeweave.
//!
//! This crate is the foundation depended on by all other citeweave crates.
//! It provides:
//! - [`CiteweaveError`]: the unified error type
//! - Domain types ([`ResponseFragment`], [`GroundingSpan`], [`AnnotatedMessage`], [`PipelineEvent`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FormatterConfig, PipelineConfig, PipelineSection, StatusConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{CiteweaveError, Result};
pub use types::{
    AnnotatedMessage, ChatMessage, CitationEvent, CitationMetadata, CitationSource,
    FragmentPart, GroundingMetadata, GroundingSource, GroundingSpan, MarkerStyle,
    MessageEvent, OffsetUnit, PipelineEvent, RequestId, ResponseFragment, Role, SourceEntry, StatusEvent,
};
