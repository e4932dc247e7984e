//! Backend-agnostic frame source abstraction.

use std::str::FromStr;

use crate::types::{CaptureError, Frame, SourceKind};

/// Pull-based video source consumed by the frame loop.
///
/// `read_frame` returns `Ok(None)` at end of stream. Callers decide whether to
/// `rewind` (finite media) or give up (live feeds) based on [`FrameSource::kind`].
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Restart from the first frame. Live sources return [`CaptureError::NotSeekable`].
    fn rewind(&mut self) -> Result<(), CaptureError>;

    fn kind(&self) -> SourceKind;

    fn label(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).read_frame()
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        (**self).rewind()
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Decoder used to open a source.
pub enum CaptureBackend {
    #[default]
    Ffmpeg,
    OpenCv,
}

impl FromStr for CaptureBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(CaptureBackend::Ffmpeg),
            "opencv" => Ok(CaptureBackend::OpenCv),
            other => Err(format!("unknown capture backend {other:?} (expected ffmpeg or opencv)")),
        }
    }
}

/// Open `descriptor` with the requested backend, producing frames of `target_size`.
pub fn open_source(
    descriptor: &str,
    target_size: (u32, u32),
    backend: CaptureBackend,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match backend {
        CaptureBackend::Ffmpeg => Ok(Box::new(crate::ffmpeg::FfmpegSource::open(
            descriptor,
            target_size,
        )?)),
        #[cfg(feature = "opencv")]
        CaptureBackend::OpenCv => Ok(Box::new(crate::camera::OpenCvSource::open(
            descriptor,
            target_size,
        )?)),
        #[cfg(not(feature = "opencv"))]
        CaptureBackend::OpenCv => Err(CaptureError::BackendUnavailable("opencv")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!("FFmpeg".parse::<CaptureBackend>(), Ok(CaptureBackend::Ffmpeg));
        assert_eq!("opencv".parse::<CaptureBackend>(), Ok(CaptureBackend::OpenCv));
        assert!("gstreamer".parse::<CaptureBackend>().is_err());
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn opencv_backend_reports_unavailable() {
        let err = open_source("0", (4, 4), CaptureBackend::OpenCv)
            .err()
            .expect("opencv backend should be unavailable");
        assert!(matches!(err, CaptureError::BackendUnavailable("opencv")));
    }
}
