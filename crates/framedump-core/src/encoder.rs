use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::error::EncodeError;
use crate::frame::RawFrame;

/// Turns one raw RGB8 frame into an image file at `dest`.
pub trait Encoder {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Write `frame` to `dest`. On failure `dest` may hold a partial file.
    fn encode(&self, frame: &RawFrame, dest: &Path) -> Result<(), EncodeError>;
}

/// Encodes by piping raw pixels into an ImageMagick-compatible `convert` CLI.
pub struct CommandEncoder {
    name: String,
    program: OsString,
    leading_args: Vec<OsString>,
}

impl CommandEncoder {
    pub fn new<I, S>(name: impl Into<String>, program: impl Into<OsString>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            name: name.into(),
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    /// GraphicsMagick: `gm convert ...`.
    pub fn graphicsmagick() -> Self {
        Self::new("graphicsmagick", "gm", ["convert"])
    }

    /// ImageMagick 6: `convert ...`.
    pub fn imagemagick() -> Self {
        Self::new("imagemagick", "convert", Vec::<OsString>::new())
    }

    fn command(&self, frame: &RawFrame, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("-size")
            .arg(format!("{}x{}", frame.width, frame.height))
            .args(["-depth", "8", "rgb:-"])
            .arg(dest)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Encoder for CommandEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, frame: &RawFrame, dest: &Path) -> Result<(), EncodeError> {
        debug!(encoder = %self.name, frame = frame.index, ?dest, "spawning encoder");

        let mut child = self
            .command(frame, dest)
            .spawn()
            .map_err(|source| EncodeError::Unavailable {
                encoder: self.name.clone(),
                source,
            })?;

        // Fed from its own thread: the encoder may fill the stderr pipe before
        // it starts reading stdin. Dropping the handle signals end of input.
        let stdin = child.stdin.take();
        let pixels = &frame.pixels;
        let (write_result, output) = thread::scope(|s| {
            let writer = s.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(pixels),
                None => Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "encoder stdin not available",
                )),
            });

            // Always reap the child, even if feeding it failed.
            let output = child.wait_with_output();
            let write_result = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("encoder stdin writer panicked")));
            (write_result, output)
        });

        let output = output.map_err(|source| EncodeError::Io {
            encoder: self.name.clone(),
            source,
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!(
                encoder = %self.name,
                frame = frame.index,
                status = %output.status,
                %stderr,
                "encoder failed"
            );
            return Err(EncodeError::Failed {
                encoder: self.name.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }

        // A successful exit with a broken pipe means the encoder did not consume the frame.
        if let Err(source) = write_result {
            error!(
                encoder = %self.name,
                frame = frame.index,
                %source,
                "failed to write pixels to encoder"
            );
            return Err(EncodeError::Io {
                encoder: self.name.clone(),
                source,
            });
        }

        if !stderr.is_empty() {
            debug!(encoder = %self.name, %stderr, "encoder diagnostics");
        }
        Ok(())
    }
}

/// Tries each encoder in order until one succeeds.
pub struct FallbackEncoder {
    encoders: Vec<Box<dyn Encoder>>,
}

impl FallbackEncoder {
    pub fn new(encoders: Vec<Box<dyn Encoder>>) -> Self {
        Self { encoders }
    }

    /// GraphicsMagick first, then ImageMagick.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Box::new(CommandEncoder::graphicsmagick()),
            Box::new(CommandEncoder::imagemagick()),
        ])
    }
}

impl Encoder for FallbackEncoder {
    fn name(&self) -> &str {
        "fallback"
    }

    fn encode(&self, frame: &RawFrame, dest: &Path) -> Result<(), EncodeError> {
        let mut attempts = Vec::new();

        for encoder in &self.encoders {
            match encoder.encode(frame, dest) {
                Ok(()) => {
                    if !attempts.is_empty() {
                        info!(
                            encoder = encoder.name(),
                            frame = frame.index,
                            failed_attempts = attempts.len(),
                            "fallback encoder succeeded"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        encoder = encoder.name(),
                        frame = frame.index,
                        error = %e,
                        "encoder attempt failed"
                    );
                    remove_partial(dest);
                    attempts.push(e);
                }
            }
        }

        Err(EncodeError::AllFailed { attempts })
    }
}

/// Delete whatever a failed encoder left at `path`. Missing files are fine.
pub(crate) fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(?path, "removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(?path, error = %e, "failed to remove partial output"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::RgbImage;
    use tracing_test::traced_test;

    use super::*;

    /// Writes a real PNG in-process.
    pub(crate) struct PngEncoder;

    impl Encoder for PngEncoder {
        fn name(&self) -> &str {
            "png"
        }

        fn encode(&self, frame: &RawFrame, dest: &Path) -> Result<(), EncodeError> {
            let img = RgbImage::from_raw(
                frame.width as u32,
                frame.height as u32,
                frame.pixels.clone(),
            )
            .expect("pixel buffer matches dimensions");
            img.save(dest).map_err(|e| EncodeError::Io {
                encoder: "png".into(),
                source: io::Error::other(e),
            })
        }
    }

    /// Leaves garbage at `dest` and reports failure.
    pub(crate) struct BrokenEncoder;

    impl Encoder for BrokenEncoder {
        fn name(&self) -> &str {
            "broken"
        }

        fn encode(&self, _frame: &RawFrame, dest: &Path) -> Result<(), EncodeError> {
            std::fs::write(dest, b"half a png").expect("write partial output");
            Err(EncodeError::Failed {
                encoder: "broken".into(),
                status: "exit status: 1".into(),
                stderr: "simulated failure".into(),
            })
        }
    }

    fn missing_encoder() -> CommandEncoder {
        CommandEncoder::new("missing", "framedump-no-such-encoder", Vec::<OsString>::new())
    }

    fn frame() -> RawFrame {
        RawFrame {
            index: 1,
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 0, 255, 0],
        }
    }

    #[test]
    #[traced_test]
    fn fallback_uses_secondary_after_primary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");

        let chain = FallbackEncoder::new(vec![Box::new(BrokenEncoder), Box::new(PngEncoder)]);
        chain.encode(&frame(), &dest).unwrap();

        assert_eq!(image::image_dimensions(&dest).unwrap(), (2, 1));
        assert!(logs_contain("encoder attempt failed"));
        assert!(logs_contain("fallback encoder succeeded"));
    }

    #[test]
    #[traced_test]
    fn fallback_uses_secondary_when_primary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");

        let chain = FallbackEncoder::new(vec![Box::new(missing_encoder()), Box::new(PngEncoder)]);
        chain.encode(&frame(), &dest).unwrap();

        assert_eq!(image::image_dimensions(&dest).unwrap(), (2, 1));
        assert!(logs_contain("encoder attempt failed"));
        assert!(logs_contain("is unavailable"));
        assert!(logs_contain("fallback encoder succeeded"));
    }

    #[test]
    fn fallback_skips_secondary_when_primary_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");
        let chain = FallbackEncoder::new(vec![Box::new(PngEncoder), Box::new(BrokenEncoder)]);
        chain.encode(&frame(), &dest).unwrap();
        assert_eq!(image::image_dimensions(&dest).unwrap(), (2, 1));
    }

    #[test]
    fn fallback_reports_every_failure_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");

        let chain = FallbackEncoder::new(vec![
            Box::new(BrokenEncoder),
            Box::new(BrokenEncoder),
        ]);
        match chain.encode(&frame(), &dest) {
            Err(EncodeError::AllFailed { attempts }) => assert_eq!(attempts.len(), 2),
            other => panic!("expected AllFailed, got {other:?}"),
        }
        assert!(!dest.exists(), "partial output should be removed");
    }

    #[test]
    fn empty_chain_fails() {
        let dir = tempfile::tempdir().unwrap();
        let chain = FallbackEncoder::new(Vec::new());
        let err = chain.encode(&frame(), &dir.path().join("x.png")).unwrap_err();
        assert!(err.to_string().contains("no encoders configured"));
    }

    #[test]
    fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = missing_encoder();
        match encoder.encode(&frame(), &dir.path().join("000001.png")) {
            Err(EncodeError::Unavailable { encoder, .. }) => assert_eq!(encoder, "missing"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = CommandEncoder::new("false", "false", Vec::<OsString>::new());
        match encoder.encode(&frame(), &dir.path().join("000001.png")) {
            Err(EncodeError::Failed { encoder, status, .. }) => {
                assert_eq!(encoder, "false");
                assert!(status.contains('1'), "{status}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_receives_size_and_pixels_on_stdin() {
        // `sh -c script arg0 arg1 ...`: the script copies stdin to the last argument
        // and records the full argument list next to it.
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");
        let script = r#"for last; do :; done; cat > "$last"; echo "$@" > "$last.args""#;
        let encoder = CommandEncoder::new("sh", "sh", ["-c", script, "sh"]);

        encoder.encode(&frame(), &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), frame().pixels);
        let args = std::fs::read_to_string(dir.path().join("000001.png.args")).unwrap();
        assert!(args.starts_with("-size 2x1 -depth 8 rgb:- "), "{args}");
    }

    #[cfg(unix)]
    #[test]
    fn encoder_flooding_stderr_before_reading_stdin_completes() {
        // More stderr than a pipe buffer holds, written before stdin is touched,
        // with a frame larger than a pipe buffer too.
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("000001.png");
        let script = r#"head -c 200000 /dev/zero >&2; for last; do :; done; cat > "$last""#;
        let encoder = CommandEncoder::new("sh", "sh", ["-c", script, "sh"]);
        let frame = RawFrame {
            index: 1,
            width: 200,
            height: 200,
            pixels: vec![0x5A; 200 * 200 * 3],
        };

        encoder.encode(&frame, &dest).unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 120_000);
    }
}
