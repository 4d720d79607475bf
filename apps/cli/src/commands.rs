//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::info;

use citeweave_core::{EventSink, FinalMessage, RequestContext, run_response, run_stream};
use citeweave_markdown::{FormatOptions, format_text_with, wrap_user_message};
use citeweave_shared::{
    AppConfig, ChatMessage, MarkerStyle, PipelineConfig, PipelineEvent, init_config, load_config,
    load_config_from,
};
use citeweave_wire::SseFragmentSource;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// citeweave: grounded answers with inline citations.
#[derive(Parser)]
#[command(
    name = "citeweave",
    version,
    about = "Assemble model responses, weave in citations, and format the result.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.citeweave/citeweave.toml.
    #[arg(long, global = true, env = "CITEWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Marker style flag values.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum MarkerArg {
    Bracket,
    Superscript,
}

impl From<MarkerArg> for MarkerStyle {
    fn from(arg: MarkerArg) -> Self {
        match arg {
            MarkerArg::Bracket => MarkerStyle::Bracket,
            MarkerArg::Superscript => MarkerStyle::Superscript,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a captured provider response through the full pipeline.
    Render {
        /// Response file, or `-` for stdin.
        input: String,

        /// Model id the response was produced by (selects the mode).
        #[arg(short, long)]
        model: String,

        /// Input is a server-sent-events stream instead of one JSON body.
        #[arg(long)]
        stream: bool,

        /// Print every pipeline event as a JSON line.
        #[arg(long)]
        events: bool,

        /// Additional model id to treat as a thinking model.
        #[arg(long = "thinking-model")]
        thinking_models: Vec<String>,

        /// Inline marker style.
        #[arg(long)]
        markers: Option<MarkerArg>,

        /// Seconds to wait for each fragment.
        #[arg(long)]
        timeout: Option<u64>,

        /// Keep inline citation markers in the formatted output.
        #[arg(long)]
        keep_markers: bool,

        /// Do not append the source list.
        #[arg(long)]
        no_sources: bool,
    },

    /// Format an assembled message: fence source lists, strip stray markers.
    Format {
        /// Message file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Keep inline citation markers.
        #[arg(long)]
        keep_markers: bool,
    },

    /// Stamp a user message with the current time and wrap it in `<inputs>`.
    WrapInput {
        /// Message file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Hours east of UTC for the timestamp (defaults to local time).
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Logs go to stderr so stdout stays clean for the rendered message.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "citeweave=info",
        1 => "citeweave=debug",
        _ => "citeweave=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Render {
            input,
            model,
            stream,
            events,
            thinking_models,
            markers,
            timeout,
            keep_markers,
            no_sources,
        } => {
            let app = resolve_config(config_path.as_ref())?;
            let mut config = PipelineConfig::from(&app);
            config.thinking_models.extend(thinking_models);
            if let Some(markers) = markers {
                config.marker_style = markers.into();
            }
            if let Some(secs) = timeout {
                if secs == 0 {
                    return Err(eyre!("--timeout must be greater than zero"));
                }
                config.fragment_timeout = std::time::Duration::from_secs(secs);
            }
            if keep_markers {
                config.strip_inline_markers = false;
            }
            if no_sources {
                config.show_search_info = false;
            }
            cmd_render(&input, &model, stream, events, &config).await
        }
        Command::Format {
            input,
            keep_markers,
        } => {
            let app = resolve_config(config_path.as_ref())?;
            let opts = FormatOptions {
                strip_markers: app.formatter.strip_inline_markers && !keep_markers,
            };
            cmd_format(&input, &opts).await
        }
        Command::WrapInput { input, utc_offset } => cmd_wrap_input(&input, utc_offset).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_ref()).await,
        },
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .wrap_err_with(|| format!("cannot open {input}"))?;
    Ok(Box::new(file))
}

async fn read_input(input: &str) -> Result<String> {
    let mut reader = open_input(input).await?;
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .await
        .wrap_err_with(|| format!("cannot read {input}"))?;
    Ok(content)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_render(
    input: &str,
    model: &str,
    stream: bool,
    events: bool,
    config: &PipelineConfig,
) -> Result<()> {
    let request = RequestContext::for_model(model, config);
    info!(
        input,
        request_id = %request.id,
        model = %request.model,
        mode = ?request.mode,
        stream,
        "rendering response"
    );

    let sink: Box<dyn EventSink> = if events {
        Box::new(JsonLinesSink)
    } else {
        Box::new(CliStatus::new())
    };

    let result = if stream {
        let mut source = SseFragmentSource::new(BufReader::new(open_input(input).await?));
        run_stream(&mut source, request, config, sink.as_ref()).await
    } else {
        let body = read_input(input).await?;
        run_response(&body, request, config, sink.as_ref())
    };
    drop(sink);

    let message = result?;
    if events {
        print_final_json(&message)?;
    } else {
        println!("{}", message.content);
    }
    Ok(())
}

async fn cmd_format(input: &str, opts: &FormatOptions) -> Result<()> {
    let content = read_input(input).await?;
    print!("{}", format_text_with(&content, opts));
    Ok(())
}

async fn cmd_wrap_input(input: &str, utc_offset: Option<i32>) -> Result<()> {
    let message = ChatMessage::user(read_input(input).await?);
    let wrapped = match utc_offset {
        Some(hours) => {
            let offset = hours
                .checked_mul(3600)
                .and_then(chrono::FixedOffset::east_opt)
                .ok_or_else(|| eyre!("--utc-offset out of range: {hours}"))?;
            wrap_user_message(&message, &chrono::Utc::now().with_timezone(&offset))
        }
        None => wrap_user_message(&message, &chrono::Local::now()),
    };
    print!("{}", wrapped.content);
    Ok(())
}

fn print_final_json(message: &FinalMessage) -> Result<()> {
    let value = serde_json::json!({
        "type": "final",
        "data": {
            "request_id": message.request_id,
            "content": message.content,
            "sources": message.source_list,
            "thinking_state": message.thinking_state.to_string(),
            "fragments": message.fragments,
            "parse_errors": message.parse_errors,
            "degraded_fragments": message.degraded_fragments,
            "elapsed_ms": message.elapsed.as_millis() as u64,
        }
    });
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Event sinks
// ---------------------------------------------------------------------------

/// Prints each event as one JSON line on stdout.
struct JsonLinesSink;

impl EventSink for JsonLinesSink {
    fn emit(&self, event: PipelineEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
    }
}

/// Shows status descriptions on a spinner; content is printed at the end.
struct CliStatus {
    spinner: ProgressBar,
}

impl CliStatus {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl EventSink for CliStatus {
    fn emit(&self, event: PipelineEvent) {
        if let PipelineEvent::Status(status) = event {
            if status.done {
                self.spinner.finish_with_message(status.description);
            } else {
                self.spinner.set_message(status.description);
            }
        }
    }
}

impl Drop for CliStatus {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
