//! FFmpeg subprocess backend.
//!
//! FFmpeg decodes whatever the descriptor points at and writes packed RGB24
//! frames, already scaled to the requested size, to its stdout. Rewinding a
//! file restarts the process from the beginning of the input.

use std::{
    io::{ErrorKind, Read},
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    source::FrameSource,
    types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index, source_label},
};

/// Frame source backed by an `ffmpeg` child process.
pub struct FfmpegSource {
    uri: String,
    kind: SourceKind,
    target_size: (u32, u32),
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
}

impl FfmpegSource {
    /// Spawn FFmpeg for `uri`, producing frames of `target_size` (width, height).
    ///
    /// A zero dimension keeps the native size, discovered with `ffprobe`.
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let kind = SourceKind::from_descriptor(uri);
        let target_size = if target_size.0 == 0 || target_size.1 == 0 {
            probe_native_size(uri, kind)?
        } else {
            target_size
        };
        let frame_bytes = target_size.0 as usize * target_size.1 as usize * 3;
        let mut source = Self {
            uri: uri.to_string(),
            kind,
            target_size,
            child: None,
            stdout: None,
            buffer: vec![0u8; frame_bytes],
        };
        source.spawn()?;
        Ok(source)
    }

    fn spawn(&mut self) -> Result<(), CaptureError> {
        let mut cmd = build_command(&self.uri, self.kind, self.target_size);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|err| {
            warn!("video-ingest: failed to spawn ffmpeg for {}: {err}", self.uri);
            CaptureError::Open {
                uri: self.uri.clone(),
            }
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

        debug!(uri = %self.uri, kind = self.kind.label(), "ffmpeg capture started");
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn shutdown_child(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        match stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(Some(Frame {
                data: self.buffer.clone(),
                width: self.target_size.0,
                height: self.target_size.1,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Rgb8,
            })),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.shutdown_child();
                Ok(None)
            }
            Err(err) => Err(CaptureError::Io(err)),
        }
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        if !self.kind.is_seekable() {
            return Err(CaptureError::NotSeekable {
                uri: self.uri.clone(),
            });
        }
        self.shutdown_child();
        self.spawn()
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn label(&self) -> String {
        source_label(&self.uri)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.shutdown_child();
    }
}

fn probe_native_size(uri: &str, kind: SourceKind) -> Result<(u32, u32), CaptureError> {
    let output = Command::new("ffprobe")
        .args(ffprobe_args(uri, kind))
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(CaptureError::Open {
            uri: uri.to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_size(&stdout).ok_or_else(|| {
        CaptureError::Other(anyhow!("ffprobe reported no video size for {uri}: {stdout:?}"))
    })
}

/// Parse `ffprobe -of csv=s=x:p=0` output such as `1920x1080`.
fn parse_probe_size(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (width, height) = line.split_once('x')?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().trim_end_matches('x').parse::<u32>().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

fn ffprobe_args(uri: &str, kind: SourceKind) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "csv=s=x:p=0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let input = match kind {
        SourceKind::Device => {
            args.extend(["-f", "video4linux2"].iter().map(|s| s.to_string()));
            match parse_device_index(uri) {
                Some(index) => format!("/dev/video{index}"),
                None => uri.to_string(),
            }
        }
        SourceKind::Rtsp => {
            args.extend(["-rtsp_transport", "tcp"].iter().map(|s| s.to_string()));
            uri.to_string()
        }
        SourceKind::Http | SourceKind::File => uri.to_string(),
    };
    args.push(input);
    args
}

fn build_command(uri: &str, kind: SourceKind, target_size: (u32, u32)) -> Command {
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);
    let mut cmd = Command::new("ffmpeg");
    cmd.args(ffmpeg_args(uri, kind, &scale_arg));
    cmd
}

/// Socket read timeout for network inputs, in microseconds. A stalled feed
/// makes ffmpeg exit, which the reader sees as end of stream.
const NETWORK_IO_TIMEOUT_US: &str = "10000000";

fn ffmpeg_args(uri: &str, kind: SourceKind, scale_arg: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let input = match kind {
        SourceKind::Device => {
            args.extend(
                ["-f", "video4linux2", "-fflags", "nobuffer"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            match parse_device_index(uri) {
                Some(index) => format!("/dev/video{index}"),
                None => uri.to_string(),
            }
        }
        SourceKind::Rtsp => {
            args.extend(
                [
                    "-rtsp_transport",
                    "tcp",
                    "-fflags",
                    "nobuffer",
                    "-flags",
                    "low_delay",
                    "-timeout",
                    NETWORK_IO_TIMEOUT_US,
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            uri.to_string()
        }
        SourceKind::Http => {
            args.extend(
                ["-rw_timeout", NETWORK_IO_TIMEOUT_US]
                    .iter()
                    .map(|s| s.to_string()),
            );
            uri.to_string()
        }
        SourceKind::File => uri.to_string(),
    };

    args.extend(
        [
            "-i", input.as_str(), "-an", "-vf", scale_arg, "-pix_fmt", "rgb24", "-f", "rawvideo", "-",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_args_use_v4l2_input() {
        let args = ffmpeg_args("2", SourceKind::Device, "scale=640:360");
        let joined = args.join(" ");
        assert!(joined.contains("-f video4linux2"));
        assert!(joined.contains("-i /dev/video2"));
        assert!(joined.ends_with("-pix_fmt rgb24 -f rawvideo -"));
    }

    #[test]
    fn rtsp_args_force_tcp() {
        let args = ffmpeg_args("rtsp://cam/live", SourceKind::Rtsp, "scale=1:1");
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-timeout 10000000 -i rtsp://cam/live"));
    }

    #[test]
    fn http_args_bound_stalled_reads() {
        let args = ffmpeg_args("http://cam/mjpg", SourceKind::Http, "scale=1:1");
        assert!(args.join(" ").contains("-rw_timeout 10000000 -i http://cam/mjpg"));

        let args = ffmpeg_args("clip.mp4", SourceKind::File, "scale=1:1");
        assert!(!args.iter().any(|arg| arg.ends_with("timeout")));
    }

    #[test]
    fn probe_output_is_parsed() {
        assert_eq!(parse_probe_size("1920x1080\n"), Some((1920, 1080)));
        // Some containers append a separator after the last field.
        assert_eq!(parse_probe_size("\n640x360x\n"), Some((640, 360)));
        assert_eq!(parse_probe_size(""), None);
        assert_eq!(parse_probe_size("0x0"), None);
    }

    #[test]
    fn probe_args_end_with_input() {
        let args = ffprobe_args("1", SourceKind::Device);
        assert_eq!(args.last().map(String::as_str), Some("/dev/video1"));
        assert!(args.iter().any(|arg| arg == "stream=width,height"));
    }

    #[test]
    fn file_args_pass_path_through() {
        let args = ffmpeg_args("clips/a b.mp4", SourceKind::File, "scale=8:8");
        let input = args.iter().position(|arg| arg == "-i").map(|i| &args[i + 1]);
        assert_eq!(input.map(String::as_str), Some("clips/a b.mp4"));
        assert!(args.iter().any(|arg| arg == "scale=8:8"));
    }
}
