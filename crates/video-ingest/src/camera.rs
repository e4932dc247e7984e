//! OpenCV-backed capture, compiled with the `opencv` feature.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::warn;

use crate::{
    source::FrameSource,
    types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index, source_label},
};

/// Frame source reading through `cv::VideoCapture`.
pub struct OpenCvSource {
    uri: String,
    kind: SourceKind,
    cap: VideoCapture,
    target_size: (u32, u32),
    frame: Mat,
    scratch: Mat,
}

impl OpenCvSource {
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let kind = SourceKind::from_descriptor(uri);
        let mut cap = open_video_capture(uri)?;
        if kind == SourceKind::Device {
            configure_camera(&mut cap, target_size);
        }
        Ok(Self {
            uri: uri.to_string(),
            kind,
            cap,
            target_size,
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }
}

impl FrameSource for OpenCvSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            return Ok(None);
        }

        let (target_w, target_h) = self.target_size;
        let resize = target_w > 0
            && target_h > 0
            && (size.width != target_w as i32 || size.height != target_h as i32);
        let working = if resize {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w as i32,
                    height: target_h as i32,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };
        let out_size = working.size().map_err(|e| CaptureError::Other(e.into()))?;

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: out_size.width as u32,
            height: out_size.height as u32,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        if !self.kind.is_seekable() {
            return Err(CaptureError::NotSeekable {
                uri: self.uri.clone(),
            });
        }
        self.cap
            .set(videoio::CAP_PROP_POS_FRAMES, 0.0)
            .map_err(|e| CaptureError::Other(e.into()))?;
        Ok(())
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn label(&self) -> String {
        source_label(&self.uri)
    }
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("video-ingest: failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    match VideoCapture::from_file(uri, videoio::CAP_ANY) {
        Ok(cap) => {
            if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                return Ok(cap);
            }
        }
        Err(err) => {
            warn!("video-ingest: failed to open {uri}: {err}");
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Keep the driver buffer shallow so reads return the freshest frame.
fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32)) {
    let _ = cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0);
    if target_size.0 > 0 && target_size.1 > 0 {
        let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
        let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    }
}
