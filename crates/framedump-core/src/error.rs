use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::frame::HEADER_LEN;

/// Failure of a single encoder invocation, or of a whole fallback chain.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder program could not be started (not installed, not executable).
    #[error("{encoder} is unavailable: {source}")]
    Unavailable {
        encoder: String,
        #[source]
        source: io::Error,
    },

    /// The encoder ran but reported failure through its exit status.
    #[error("{encoder} exited with {status}: {stderr}")]
    Failed {
        encoder: String,
        status: String,
        stderr: String,
    },

    #[error("{encoder} I/O error: {source}")]
    Io {
        encoder: String,
        #[source]
        source: io::Error,
    },

    /// Every encoder in a fallback chain was tried and none succeeded.
    #[error("all encoders failed: {}", summarize(.attempts))]
    AllFailed { attempts: Vec<EncodeError> },
}

fn summarize(attempts: &[EncodeError]) -> String {
    if attempts.is_empty() {
        return "no encoders configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal errors raised while demuxing a frame stream.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("output directory does not exist: {}", .0.display())]
    OutputDirMissing(PathBuf),

    #[error("output path is not a directory: {}", .0.display())]
    OutputNotDirectory(PathBuf),

    #[error(
        "incomplete header at frame {frame}: read {read} of {} bytes \
         (short by {})",
        HEADER_LEN,
        HEADER_LEN - .read
    )]
    TruncatedHeader { frame: u64, read: usize },

    #[error(
        "incomplete pixel data at frame {frame}: read {read} of {expected} bytes \
         (short by {})",
        .expected - .read
    )]
    TruncatedPayload { frame: u64, expected: u64, read: u64 },

    #[error(
        "frame {frame} declares {width}x{height} pixels, \
         which exceeds the payload limit of {limit} bytes"
    )]
    PayloadTooLarge {
        frame: u64,
        width: u64,
        height: u64,
        limit: u64,
    },

    #[error("frame {frame} has empty dimensions {width}x{height}")]
    EmptyFrame { frame: u64, width: u64, height: u64 },

    #[error("failed to read frame {frame}: {source}")]
    Read {
        frame: u64,
        #[source]
        source: io::Error,
    },

    #[error("error converting frame {frame} to {}: {source}", .path.display())]
    Encoding {
        frame: u64,
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    #[error("frame {frame}: encoder output {} is unreadable: {source}", .path.display())]
    UnreadableOutput {
        frame: u64,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(
        "frame {frame}: encoder output {} is {actual_width}x{actual_height}, \
         expected {width}x{height}",
        .path.display()
    )]
    DimensionMismatch {
        frame: u64,
        path: PathBuf,
        width: u64,
        height: u64,
        actual_width: u32,
        actual_height: u32,
    },
}

impl DemuxError {
    /// Frame index the error occurred at, if it happened inside the loop.
    pub fn frame(&self) -> Option<u64> {
        match self {
            DemuxError::OutputDirMissing(_) | DemuxError::OutputNotDirectory(_) => None,
            DemuxError::TruncatedHeader { frame, .. }
            | DemuxError::TruncatedPayload { frame, .. }
            | DemuxError::PayloadTooLarge { frame, .. }
            | DemuxError::EmptyFrame { frame, .. }
            | DemuxError::Read { frame, .. }
            | DemuxError::Encoding { frame, .. }
            | DemuxError::UnreadableOutput { frame, .. }
            | DemuxError::DimensionMismatch { frame, .. } => Some(*frame),
        }
    }
}
