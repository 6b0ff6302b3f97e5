use std::path::PathBuf;

use clap::Parser;

use framedump_core::demux::DEFAULT_MAX_PAYLOAD_BYTES;

#[derive(Parser)]
#[command(
    name = "framedump",
    version,
    about = "Split a raw RGB8 frame stream into numbered PNG files",
    after_help = "Reads frames from stdin unless --input is given:\n  \
                  framedump <OUTPUT_DIR> < frames.bin"
)]
pub struct Cli {
    /// Existing directory to write 000001.png, 000002.png, ... into.
    pub output_dir: PathBuf,

    /// Read frames from this file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Reject frames whose pixel payload is larger than this many bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: u64,

    /// Skip reading back each written PNG to check its dimensions.
    #[arg(long)]
    pub no_verify: bool,

    /// Only log warnings and errors (RUST_LOG still takes precedence).
    #[arg(short, long)]
    pub quiet: bool,
}
