//! citeweave CLI: replay provider responses through the citation pipeline.
//!
//! Reads a captured response (a JSON body or an SSE stream), assembles it,
//! annotates grounded answers with citation markers, and prints the final
//! formatted message.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
