mod cli;

use std::fs::File;
use std::io::{self, BufReader, IsTerminal, Read};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use framedump_core::demux::{self, DemuxConfig};
use framedump_core::encoder::FallbackEncoder;

fn main() -> Result<()> {
    // Usage errors exit with 1 like every other failure; --help/--version exit 0.
    let cli = cli::Cli::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        std::process::exit(code);
    });

    let default_filter = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let config = DemuxConfig {
        output_dir: cli.output_dir,
        max_payload_bytes: cli.max_payload_bytes,
        verify_output: !cli.no_verify,
    };

    let input: Box<dyn Read> = match &cli.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open input {}", path.display()))?;
            info!(?path, "reading frames from file");
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    let encoder = FallbackEncoder::default_chain();
    let frames = demux::run(input, &config, &encoder).context("frame dump failed")?;

    info!(frames, output_dir = ?config.output_dir, "done");
    Ok(())
}
