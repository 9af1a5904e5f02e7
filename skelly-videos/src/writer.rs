//! Video output by piping raw BGR frames through an ffmpeg child process.
//!
//! The shared-memory images are packed BGR8, so the pipe carries
//! `-f rawvideo -pix_fmt bgr24` and the `writer_fourcc` from the camera
//! config picks the encoder.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::{debug, warn};

use skelly_types::CameraConfig;

use crate::{Error, Result};

/// Map an OpenCV-style four-character writer code to an ffmpeg encoder.
pub fn codec_for_fourcc(fourcc: &str) -> &'static str {
    match fourcc {
        "mp4v" | "MP4V" => "mpeg4",
        "avc1" | "H264" | "h264" | "X264" => "libx264",
        "XVID" | "xvid" => "libxvid",
        "MJPG" | "mjpg" => "mjpeg",
        other => {
            warn!("unknown writer fourcc '{other}', falling back to mpeg4");
            "mpeg4"
        }
    }
}

/// Probe for a usable ffmpeg on PATH. Recording requires it; tests skip the
/// encoder assertions when it is absent.
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// One camera's video file. Frames go straight to the encoder's stdin; the
/// file is finalized by `close`, which waits for ffmpeg to drain and checks
/// its exit status.
pub struct VideoWriter {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frame_count: u64,
    expected_frame_bytes: usize,
}

impl VideoWriter {
    pub fn open(path: &Path, config: &CameraConfig) -> Result<Self> {
        let resolution = config.effective_resolution();
        let codec = codec_for_fourcc(&config.writer_fourcc);
        let framerate = format!("{}", config.framerate);
        let size = format!("{}x{}", resolution.width, resolution.height);
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-nostdin",
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-s",
                &size,
                "-r",
                &framerate,
                "-i",
                "-",
                "-an",
                "-c:v",
                codec,
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        debug!("started ffmpeg ({codec}) writing {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            child: Some(child),
            stdin,
            frame_count: 0,
            expected_frame_bytes: resolution.width as usize * resolution.height as usize * 3,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn write_frame(&mut self, image: &[u8]) -> Result<()> {
        if image.len() != self.expected_frame_bytes {
            return Err(Error::FrameSize {
                expected: self.expected_frame_bytes,
                actual: image.len(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or(Error::AlreadyClosed)?;
        match stdin.write_all(image) {
            Ok(()) => {
                self.frame_count += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                // ffmpeg died underneath us; surface what it said.
                Err(self.collect_failure())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the pipe, wait for the encoder and check its exit status.
    /// Returns the number of frames written.
    pub fn close(mut self) -> Result<u64> {
        self.stdin.take();
        let mut child = self.child.take().ok_or(Error::AlreadyClosed)?;
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::Ffmpeg {
                status,
                stderr: read_stderr(&mut child),
            });
        }
        debug!(
            "finalized {} with {} frame(s)",
            self.path.display(),
            self.frame_count
        );
        Ok(self.frame_count)
    }

    fn collect_failure(&mut self) -> Error {
        match self.child.take() {
            Some(mut child) => {
                let stderr = read_stderr(&mut child);
                match child.wait() {
                    Ok(status) => Error::Ffmpeg { status, stderr },
                    Err(e) => e.into(),
                }
            }
            None => Error::AlreadyClosed,
        }
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        // Close the pipe and reap; errors are already surfaced on the
        // explicit close path.
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

fn read_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }
    // Keep the tail; ffmpeg preambles are long and the error is at the end.
    let tail_start = stderr.len().saturating_sub(2000);
    stderr[tail_start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skelly_types::{CameraId, Resolution};

    fn config() -> CameraConfig {
        let mut config = CameraConfig::new(CameraId(0));
        config.resolution = Resolution::new(32, 16);
        config
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(codec_for_fourcc("mp4v"), "mpeg4");
        assert_eq!(codec_for_fourcc("avc1"), "libx264");
        assert_eq!(codec_for_fourcc("garbage"), "mpeg4");
    }

    #[test]
    fn writes_and_finalizes_a_video() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let config = config();
        let mut writer = VideoWriter::open(&path, &config).unwrap();
        let frame = vec![128u8; config.image_size_bytes()];
        for _ in 0..10 {
            writer.write_frame(&frame).unwrap();
        }
        let frames = writer.close().unwrap();
        assert_eq!(frames, 10);
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn zero_frame_video_still_finalizes() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        let writer = VideoWriter::open(&path, &config()).unwrap();
        writer.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        if !ffmpeg_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut writer = VideoWriter::open(&dir.path().join("x.mp4"), &config()).unwrap();
        assert!(matches!(
            writer.write_frame(&[0u8; 7]),
            Err(Error::FrameSize { .. })
        ));
    }
}
