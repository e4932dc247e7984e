//! Configuration parsing for the detector.
//!
//! CLI flags and `FIREWATCH_*` environment variables are read once into
//! [`DetectorCliArgs`] and validated into a [`DetectorConfig`] that the rest of
//! the pipeline consumes without re-parsing.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;
use video_ingest::CaptureBackend;

pub(crate) const DEFAULT_VLM_URL: &str = "http://localhost:11434/v1/chat/completions";
pub(crate) const DEFAULT_MODEL: &str = "gemma3:4b";
pub(crate) const DEFAULT_ALERT_SOUND: &str = "/usr/share/sounds/alsa/Front_Center.wav";

#[derive(Clone, Debug)]
/// Validated settings shared by every stage.
pub struct DetectorConfig {
    /// Device index, `/dev/videoN`, RTSP/HTTP URL, or file path.
    pub source: String,
    pub backend: CaptureBackend,
    /// OpenAI-compatible chat-completions endpoint.
    pub vlm_url: String,
    pub model: String,
    pub bind: String,
    pub port: u16,
    /// Display resolution; 0×0 streams at native size.
    pub stream_size: (u32, u32),
    pub stream_quality: u8,
    pub stream_fps: u32,
    /// Resolution of frames sent to the classifier.
    pub vlm_size: (u32, u32),
    pub vlm_quality: u8,
    /// Classify every Nth frame.
    pub frame_skip: u64,
    pub max_tokens: u32,
    pub vlm_timeout: Duration,
    pub smoke_enhance: bool,
    pub alert_sound: bool,
    pub alert_sound_file: PathBuf,
    pub log_dir: PathBuf,
    /// Dashboard page served at `/`.
    pub index_path: PathBuf,
}

impl DetectorConfig {
    /// Minimum spacing between frame-loop iterations and stream parts.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.stream_fps.max(1)))
    }
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct DetectorCliArgs {
    /// Video source: camera index, /dev/videoN, rtsp:// or http(s):// URL, or a file.
    #[arg(value_name = "SOURCE", env = "FIREWATCH_SOURCE")]
    source: Option<String>,

    #[arg(long = "source", value_name = "SOURCE")]
    source_flag: Option<String>,

    /// Capture backend (`ffmpeg` or `opencv`).
    #[arg(long, env = "FIREWATCH_CAPTURE_BACKEND", default_value = "ffmpeg")]
    backend: CaptureBackend,

    #[arg(long, env = "FIREWATCH_VLM_URL", default_value = DEFAULT_VLM_URL)]
    vlm_url: String,

    #[arg(long, env = "FIREWATCH_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "FIREWATCH_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "FIREWATCH_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "FIREWATCH_STREAM_WIDTH", value_name = "PX", default_value_t = 1120)]
    stream_width: u32,

    #[arg(long, env = "FIREWATCH_STREAM_HEIGHT", value_name = "PX", default_value_t = 630)]
    stream_height: u32,

    #[arg(long, env = "FIREWATCH_STREAM_QUALITY", default_value_t = 72)]
    stream_quality: u8,

    #[arg(long, env = "FIREWATCH_STREAM_FPS", default_value_t = 30)]
    stream_fps: u32,

    #[arg(long, env = "FIREWATCH_VLM_WIDTH", value_name = "PX", default_value_t = 640)]
    vlm_width: u32,

    #[arg(long, env = "FIREWATCH_VLM_HEIGHT", value_name = "PX", default_value_t = 360)]
    vlm_height: u32,

    #[arg(long, env = "FIREWATCH_VLM_QUALITY", default_value_t = 60)]
    vlm_quality: u8,

    /// Send every Nth frame to the classifier.
    #[arg(long, env = "FIREWATCH_FRAME_SKIP", value_name = "N", default_value_t = 30)]
    frame_skip: u64,

    #[arg(long, env = "FIREWATCH_MAX_TOKENS", default_value_t = 80)]
    max_tokens: u32,

    #[arg(long, env = "FIREWATCH_VLM_TIMEOUT_SECS", value_name = "SECS", default_value_t = 60)]
    vlm_timeout_secs: u64,

    /// Skip contrast enhancement of classification frames.
    #[arg(long, env = "FIREWATCH_NO_SMOKE_ENHANCE")]
    no_smoke_enhance: bool,

    #[arg(long, env = "FIREWATCH_NO_ALERT_SOUND")]
    no_alert_sound: bool,

    #[arg(long, env = "FIREWATCH_ALERT_SOUND_FILE", default_value = DEFAULT_ALERT_SOUND)]
    alert_sound_file: PathBuf,

    #[arg(long, env = "FIREWATCH_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long = "index", env = "FIREWATCH_INDEX_HTML", default_value = "static/index.html")]
    index_path: PathBuf,
}

impl TryFrom<DetectorCliArgs> for DetectorConfig {
    type Error = anyhow::Error;

    fn try_from(args: DetectorCliArgs) -> Result<Self> {
        let source = args
            .source_flag
            .or(args.source)
            .unwrap_or_else(|| "0".to_string());
        if source.trim().is_empty() {
            bail!("Video source must not be empty");
        }

        if !(1..=100).contains(&args.stream_quality) {
            bail!("--stream-quality must be an integer between 1 and 100");
        }
        if !(1..=100).contains(&args.vlm_quality) {
            bail!("--vlm-quality must be an integer between 1 and 100");
        }
        if args.frame_skip == 0 {
            bail!("--frame-skip must be at least 1");
        }
        if args.stream_fps == 0 {
            bail!("--stream-fps must be at least 1");
        }
        if args.vlm_timeout_secs == 0 {
            bail!("--vlm-timeout-secs must be at least 1");
        }
        if args.vlm_width == 0 || args.vlm_height == 0 {
            bail!("Classifier dimensions must be positive integers");
        }
        if (args.stream_width == 0) != (args.stream_height == 0) {
            bail!("Stream dimensions must both be positive, or both 0 for native size");
        }

        Ok(Self {
            source,
            backend: args.backend,
            vlm_url: args.vlm_url,
            model: args.model,
            bind: args.bind,
            port: args.port,
            stream_size: (args.stream_width, args.stream_height),
            stream_quality: args.stream_quality,
            stream_fps: args.stream_fps,
            vlm_size: (args.vlm_width, args.vlm_height),
            vlm_quality: args.vlm_quality,
            frame_skip: args.frame_skip,
            max_tokens: args.max_tokens,
            vlm_timeout: Duration::from_secs(args.vlm_timeout_secs),
            smoke_enhance: !args.no_smoke_enhance,
            alert_sound: !args.no_alert_sound,
            alert_sound_file: args.alert_sound_file,
            log_dir: args.log_dir,
            index_path: args.index_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: DetectorCliArgs,
    }

    fn parse(argv: &[&str]) -> Result<DetectorConfig> {
        let harness = Harness::try_parse_from(std::iter::once("firewatch").chain(argv.iter().copied()))?;
        DetectorConfig::try_from(harness.args)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.source, "0");
        assert_eq!(config.backend, CaptureBackend::Ffmpeg);
        assert_eq!(config.vlm_url, DEFAULT_VLM_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.port, 8080);
        assert_eq!(config.stream_size, (1120, 630));
        assert_eq!(config.stream_quality, 72);
        assert_eq!(config.vlm_size, (640, 360));
        assert_eq!(config.vlm_quality, 60);
        assert_eq!(config.frame_skip, 30);
        assert_eq!(config.max_tokens, 80);
        assert_eq!(config.vlm_timeout, Duration::from_secs(60));
        assert!(config.smoke_enhance);
        assert!(config.alert_sound);
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn source_flag_wins_over_positional() {
        let config = parse(&["clip.mp4", "--source", "rtsp://cam/1"]).unwrap();
        assert_eq!(config.source, "rtsp://cam/1");
        let config = parse(&["clip.mp4", "--no-smoke-enhance"]).unwrap();
        assert_eq!(config.source, "clip.mp4");
        assert!(!config.smoke_enhance);
    }

    #[test]
    fn native_stream_size_needs_both_dimensions_zero() {
        let config = parse(&["--stream-width", "0", "--stream-height", "0"]).unwrap();
        assert_eq!(config.stream_size, (0, 0));
        assert!(parse(&["--stream-width", "0"]).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse(&["--stream-quality", "0"]).is_err());
        assert!(parse(&["--vlm-quality", "101"]).is_err());
        assert!(parse(&["--frame-skip", "0"]).is_err());
        assert!(parse(&["--stream-fps", "0"]).is_err());
        assert!(parse(&["--vlm-timeout-secs", "0"]).is_err());
        assert!(parse(&["--vlm-width", "0"]).is_err());
        assert!(parse(&["--backend", "gstreamer"]).is_err());
    }
}
