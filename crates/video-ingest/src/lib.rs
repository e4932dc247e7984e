//! Video acquisition for the firewatch pipeline.
//!
//! Sources are pulled one frame at a time through [`FrameSource`]. The default
//! backend shells out to FFmpeg; the `opencv` feature adds a `VideoCapture`
//! backend for hosts that ship OpenCV.

#[cfg(feature = "opencv")]
mod camera;
mod ffmpeg;
mod source;
mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvSource;
pub use ffmpeg::FfmpegSource;
pub use source::{CaptureBackend, FrameSource, open_source};
pub use types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index, source_label};

/// Outcome of probing one capture device index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceProbe {
    /// Device opened and produced a frame of the given size.
    Ready { index: i32, width: u32, height: u32 },
    /// Device opened but no frame could be read.
    NoFrames { index: i32 },
    /// Device could not be opened.
    Unavailable { index: i32, reason: String },
}

impl DeviceProbe {
    pub fn index(&self) -> i32 {
        match self {
            DeviceProbe::Ready { index, .. }
            | DeviceProbe::NoFrames { index }
            | DeviceProbe::Unavailable { index, .. } => *index,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceProbe::Ready { .. })
    }
}

/// Try each device index in `0..max_index`, reading a single frame from each.
pub fn probe_devices(
    max_index: i32,
    target_size: (u32, u32),
    backend: CaptureBackend,
) -> Vec<DeviceProbe> {
    (0..max_index)
        .map(|index| match open_source(&index.to_string(), target_size, backend) {
            Ok(mut source) => match source.read_frame() {
                Ok(Some(frame)) => DeviceProbe::Ready {
                    index,
                    width: frame.width,
                    height: frame.height,
                },
                Ok(None) | Err(_) => DeviceProbe::NoFrames { index },
            },
            Err(err) => DeviceProbe::Unavailable {
                index,
                reason: err.to_string(),
            },
        })
        .collect()
}
