use std::io::{self, Read};

use tracing::{debug, error, info};

use crate::error::DemuxError;

/// Size of the width/height prefix in front of every frame.
pub const HEADER_LEN: usize = 16;

/// Bytes per pixel for packed RGB8.
pub const BYTES_PER_PIXEL: u64 = 3;

/// Width and height of the frame that follows, both little-endian u64 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u64,
    pub height: u64,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        let mut width = [0u8; 8];
        let mut height = [0u8; 8];
        width.copy_from_slice(&bytes[..8]);
        height.copy_from_slice(&bytes[8..]);
        Self {
            width: u64::from_le_bytes(width),
            height: u64::from_le_bytes(height),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..].copy_from_slice(&self.height.to_le_bytes());
        out
    }

    /// Payload length in bytes, or `None` if `width * height * 3` overflows u64.
    pub fn payload_len(self) -> Option<u64> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(BYTES_PER_PIXEL)
    }
}

/// One frame read from the stream: dimensions plus packed RGB8 pixels.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// 1-based position of the frame in the stream.
    pub index: u64,
    pub width: u64,
    pub height: u64,
    pub pixels: Vec<u8>,
}

/// Reads header + payload records from a byte stream, one frame at a time.
pub struct FrameReader<R> {
    input: R,
    next_index: u64,
    max_payload_bytes: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(input: R, max_payload_bytes: u64) -> Self {
        Self {
            input,
            next_index: 1,
            max_payload_bytes,
        }
    }

    /// Number of complete frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.next_index - 1
    }

    /// Read the next frame, or `None` on a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, DemuxError> {
        let index = self.next_index;

        let mut header_buf = [0u8; HEADER_LEN];
        let read = read_full(&mut self.input, &mut header_buf)
            .map_err(|source| DemuxError::Read { frame: index, source })?;

        if read == 0 {
            info!(total_frames = self.frames_read(), "input stream ended");
            return Ok(None);
        }
        if read < HEADER_LEN {
            error!(frame = index, read_bytes = read, "stream ended mid-header");
            return Err(DemuxError::TruncatedHeader { frame: index, read });
        }

        let header = FrameHeader::parse(&header_buf);
        let FrameHeader { width, height } = header;

        if width == 0 || height == 0 {
            error!(frame = index, width, height, "frame has empty dimensions");
            return Err(DemuxError::EmptyFrame {
                frame: index,
                width,
                height,
            });
        }

        let expected = match header.payload_len() {
            Some(len) if len <= self.max_payload_bytes => len,
            _ => {
                error!(
                    frame = index,
                    width,
                    height,
                    limit = self.max_payload_bytes,
                    "declared payload exceeds limit"
                );
                return Err(DemuxError::PayloadTooLarge {
                    frame: index,
                    width,
                    height,
                    limit: self.max_payload_bytes,
                });
            }
        };

        // Grows with the bytes actually delivered, so a lying header on a
        // short stream never allocates the full declared size.
        let mut pixels = Vec::new();
        let read = self
            .input
            .by_ref()
            .take(expected)
            .read_to_end(&mut pixels)
            .map_err(|source| DemuxError::Read { frame: index, source })?
            as u64;

        if read < expected {
            error!(
                frame = index,
                read_bytes = read,
                expected_bytes = expected,
                "stream ended mid-payload"
            );
            return Err(DemuxError::TruncatedPayload {
                frame: index,
                expected,
                read,
            });
        }

        self.next_index += 1;
        debug!(frame = index, width, height, bytes = expected, "read frame");

        Ok(Some(RawFrame {
            index,
            width,
            height,
            pixels,
        }))
    }
}

/// Fill `buf` as far as the stream allows, returning the number of bytes read.
/// Short only at end of stream.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match input.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
