use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::encoder::{remove_partial, Encoder};
use crate::error::DemuxError;
use crate::frame::{FrameReader, RawFrame};

/// Default payload ceiling: 1 GiB, enough for a 16384x16384 RGB8 frame.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1 << 30;

/// Parameters for a demux run.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Existing directory that receives `NNNNNN.png` files.
    pub output_dir: PathBuf,
    /// Frames whose declared payload exceeds this many bytes are rejected.
    pub max_payload_bytes: u64,
    /// Read back every written PNG and check its dimensions.
    pub verify_output: bool,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            verify_output: true,
        }
    }
}

/// Destination file for the frame at `index` (1-based).
pub fn frame_path(output_dir: &Path, index: u64) -> PathBuf {
    output_dir.join(format!("{index:06}.png"))
}

/// Split `input` into frames and hand each one to `encoder`, in order.
///
/// Returns the number of frames written. Stops at the first error; frames
/// already written stay on disk, the failing frame leaves nothing behind.
pub fn run<R: Read>(
    input: R,
    config: &DemuxConfig,
    encoder: &dyn Encoder,
) -> Result<u64, DemuxError> {
    check_output_dir(&config.output_dir)?;

    info!(
        output_dir = ?config.output_dir,
        max_payload_bytes = config.max_payload_bytes,
        verify_output = config.verify_output,
        encoder = encoder.name(),
        "demux starting"
    );

    let mut reader = FrameReader::new(input, config.max_payload_bytes);

    while let Some(frame) = reader.next_frame()? {
        let path = frame_path(&config.output_dir, frame.index);
        write_frame(&frame, &path, config, encoder)?;
        info!(
            frame = frame.index,
            "Wrote {} ({}x{})",
            path.display(),
            frame.width,
            frame.height
        );
    }

    let count = reader.frames_read();
    info!(frame_count = count, "Processed {count} frames");
    Ok(count)
}

fn check_output_dir(dir: &Path) -> Result<(), DemuxError> {
    if !dir.exists() {
        error!(?dir, "output directory does not exist");
        return Err(DemuxError::OutputDirMissing(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        error!(?dir, "output path is not a directory");
        return Err(DemuxError::OutputNotDirectory(dir.to_path_buf()));
    }
    Ok(())
}

fn write_frame(
    frame: &RawFrame,
    path: &Path,
    config: &DemuxConfig,
    encoder: &dyn Encoder,
) -> Result<(), DemuxError> {
    if let Err(source) = encoder.encode(frame, path) {
        error!(frame = frame.index, ?path, error = %source, "error converting frame");
        remove_partial(path);
        return Err(DemuxError::Encoding {
            frame: frame.index,
            path: path.to_path_buf(),
            source,
        });
    }

    if config.verify_output {
        if let Err(e) = verify_dimensions(frame, path) {
            error!(
                frame = frame.index,
                ?path,
                error = %e,
                "encoder output failed verification"
            );
            remove_partial(path);
            return Err(e);
        }
    }

    Ok(())
}

fn verify_dimensions(frame: &RawFrame, path: &Path) -> Result<(), DemuxError> {
    let (actual_width, actual_height) =
        image::image_dimensions(path).map_err(|source| DemuxError::UnreadableOutput {
            frame: frame.index,
            path: path.to_path_buf(),
            source,
        })?;

    if u64::from(actual_width) != frame.width || u64::from(actual_height) != frame.height {
        return Err(DemuxError::DimensionMismatch {
            frame: frame.index,
            path: path.to_path_buf(),
            width: frame.width,
            height: frame.height,
            actual_width,
            actual_height,
        });
    }

    debug!(frame = frame.index, ?path, "verified output dimensions");
    Ok(())
}
