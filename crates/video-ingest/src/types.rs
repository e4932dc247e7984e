use thiserror::Error;

/// Raw packed frame pulled from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb8,
    Bgr8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

impl Frame {
    /// Expected buffer length for the frame's dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Transport a source descriptor resolves to.
pub enum SourceKind {
    /// Local V4L device, addressed by index or `/dev/videoN`.
    Device,
    /// Real-time streaming protocol feed.
    Rtsp,
    /// HTTP(S) stream such as a remote MJPEG camera.
    Http,
    /// Recorded footage on disk.
    File,
}

impl SourceKind {
    /// Infer the transport kind from a descriptor.
    pub fn from_descriptor(descriptor: &str) -> Self {
        if parse_device_index(descriptor).is_some() {
            SourceKind::Device
        } else if descriptor.starts_with("rtsp://") || descriptor.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if descriptor.starts_with("http://") || descriptor.starts_with("https://") {
            SourceKind::Http
        } else {
            SourceKind::File
        }
    }

    /// Finite media can be rewound when exhausted; live feeds cannot.
    pub fn is_seekable(self) -> bool {
        matches!(self, SourceKind::File)
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Device => "device",
            SourceKind::Rtsp => "rtsp",
            SourceKind::Http => "http",
            SourceKind::File => "file",
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} cannot be rewound")]
    NotSeekable { uri: String },
    #[error("video source {uri:?} produced no frames")]
    Empty { uri: String },
    #[error("live source {uri:?} stopped producing frames")]
    Ended { uri: String },
    #[error("short frame: got {got} bytes, expected {expected}")]
    ShortFrame { got: usize, expected: usize },
    #[error("capture backend {0:?} is not compiled into this build")]
    BackendUnavailable(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parse a `/dev/videoX` style URI or bare index and return the index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return (index >= 0).then_some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}

/// Human-readable label shown on the dashboard for a descriptor.
pub fn source_label(descriptor: &str) -> String {
    match SourceKind::from_descriptor(descriptor) {
        SourceKind::Device => match parse_device_index(descriptor) {
            Some(index) => format!("Camera {index}"),
            None => "Camera".to_string(),
        },
        SourceKind::File => std::path::Path::new(descriptor)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| descriptor.to_string()),
        SourceKind::Rtsp | SourceKind::Http => descriptor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_descriptors() {
        assert_eq!(SourceKind::from_descriptor("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_descriptor("/dev/video2"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_descriptor("rtsp://10.0.0.4/live"),
            SourceKind::Rtsp
        );
        assert_eq!(
            SourceKind::from_descriptor("http://cam.local/mjpg"),
            SourceKind::Http
        );
        assert_eq!(
            SourceKind::from_descriptor("footage/kitchen.mp4"),
            SourceKind::File
        );
    }

    #[test]
    fn only_files_are_seekable() {
        assert!(SourceKind::File.is_seekable());
        assert!(!SourceKind::Device.is_seekable());
        assert!(!SourceKind::Rtsp.is_seekable());
        assert!(!SourceKind::Http.is_seekable());
    }

    #[test]
    fn device_index_rejects_garbage() {
        assert_eq!(parse_device_index("/dev/video10"), Some(10));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("-1"), None);
    }

    #[test]
    fn labels_follow_source_kind() {
        assert_eq!(source_label("1"), "Camera 1");
        assert_eq!(source_label("/srv/clips/smoke_test.mp4"), "smoke_test.mp4");
        assert_eq!(source_label("rtsp://cam/1"), "rtsp://cam/1");
    }
}
