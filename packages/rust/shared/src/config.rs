//! Application configuration for citeweave.
//!
//! User config lives at `~/.citeweave/citeweave.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CiteweaveError, Result};
use crate::types::MarkerStyle;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "citeweave.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".citeweave";

// ---------------------------------------------------------------------------
// Config structs (matching citeweave.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Stream assembly and annotation settings.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Status descriptions pushed to the host.
    #[serde(default)]
    pub status: StatusConfig,

    /// Final formatting pass.
    #[serde(default)]
    pub formatter: FormatterConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Model ids whose responses start with a reasoning channel.
    #[serde(default)]
    pub thinking_models: Vec<String>,

    /// Model id suffix that selects grounded search.
    #[serde(default = "default_search_suffix")]
    pub search_suffix: String,

    /// Append the rendered source list to grounded answers.
    #[serde(default = "default_true")]
    pub show_search_info: bool,

    /// Remove `<thinking>` tags from reasoning text.
    #[serde(default = "default_true")]
    pub filter_thinking_tags: bool,

    /// Maximum wait for the next fragment, in seconds.
    #[serde(default = "default_fragment_timeout")]
    pub fragment_timeout_secs: u64,

    /// Push one citation event per cited source.
    #[serde(default = "default_true")]
    pub emit_citations: bool,

    /// Inline marker rendering.
    #[serde(default)]
    pub marker_style: MarkerStyle,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            thinking_models: Vec::new(),
            search_suffix: default_search_suffix(),
            show_search_info: true,
            filter_thinking_tags: true,
            fragment_timeout_secs: default_fragment_timeout(),
            emit_citations: true,
            marker_style: MarkerStyle::default(),
        }
    }
}

fn default_search_suffix() -> String {
    "-search".into()
}
fn default_fragment_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

/// `[status]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_searching")]
    pub searching: String,
    #[serde(default = "default_thinking")]
    pub thinking: String,
    #[serde(default = "default_generating")]
    pub generating: String,
    #[serde(default = "default_thinking_ended")]
    pub thinking_ended: String,
    #[serde(default = "default_succeeded")]
    pub succeeded: String,
    #[serde(default = "default_failed")]
    pub failed: String,
    /// Summary line of the collapsible reasoning block.
    #[serde(default = "default_reasoning_label")]
    pub reasoning_label: String,
    /// Summary line of the collapsible source list.
    #[serde(default = "default_sources_label")]
    pub sources_label: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            searching: default_searching(),
            thinking: default_thinking(),
            generating: default_generating(),
            thinking_ended: default_thinking_ended(),
            succeeded: default_succeeded(),
            failed: default_failed(),
            reasoning_label: default_reasoning_label(),
            sources_label: default_sources_label(),
        }
    }
}

fn default_searching() -> String {
    "🔍 Searching the web…".into()
}
fn default_thinking() -> String {
    "🧐 Thinking…".into()
}
fn default_generating() -> String {
    "🚀 Generating…".into()
}
fn default_thinking_ended() -> String {
    "😄 Thinking finished".into()
}
fn default_succeeded() -> String {
    "🎉 Generation succeeded".into()
}
fn default_failed() -> String {
    "❌ Generation failed".into()
}
fn default_reasoning_label() -> String {
    "Thought process".into()
}
fn default_sources_label() -> String {
    "Sources".into()
}

/// `[formatter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Remove `[n]` and `<sup>[n]</sup>` outside the source list.
    #[serde(default = "default_true")]
    pub strip_inline_markers: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            strip_inline_markers: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thinking_models: Vec<String>,
    pub search_suffix: String,
    pub show_search_info: bool,
    pub filter_thinking_tags: bool,
    pub fragment_timeout: Duration,
    pub emit_citations: bool,
    pub marker_style: MarkerStyle,
    pub strip_inline_markers: bool,
    pub status: StatusConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            thinking_models: config.pipeline.thinking_models.clone(),
            search_suffix: config.pipeline.search_suffix.clone(),
            show_search_info: config.pipeline.show_search_info,
            filter_thinking_tags: config.pipeline.filter_thinking_tags,
            fragment_timeout: Duration::from_secs(config.pipeline.fragment_timeout_secs),
            emit_citations: config.pipeline.emit_citations,
            marker_style: config.pipeline.marker_style,
            strip_inline_markers: config.formatter.strip_inline_markers,
            status: config.status.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.citeweave/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CiteweaveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.citeweave/citeweave.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CiteweaveError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CiteweaveError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CiteweaveError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CiteweaveError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CiteweaveError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.pipeline.fragment_timeout_secs == 0 {
        return Err(CiteweaveError::config(
            "pipeline.fragment_timeout_secs must be greater than zero",
        ));
    }
    if config.pipeline.search_suffix.trim().is_empty() {
        return Err(CiteweaveError::config("pipeline.search_suffix must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("search_suffix"));
        assert!(toml_str.contains("marker_style = \"bracket\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.fragment_timeout_secs, 120);
        assert!(parsed.formatter.strip_inline_markers);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
thinking_models = ["gemini-2.0-flash-thinking-exp"]
marker_style = "superscript"

[status]
failed = "boom"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.thinking_models.len(), 1);
        assert_eq!(config.pipeline.marker_style, MarkerStyle::Superscript);
        assert_eq!(config.pipeline.search_suffix, "-search");
        assert_eq!(config.status.failed, "boom");
        assert_eq!(config.status.succeeded, default_succeeded());
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.fragment_timeout, Duration::from_secs(120));
        assert!(pipeline.show_search_info);
        assert!(pipeline.strip_inline_markers);
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.fragment_timeout_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("fragment_timeout_secs"));
    }
}
