//! Embedded HTML served when no dashboard file is involved.

/// Minimal viewer for the `debug-camera` stream.
pub(crate) const DEBUG_CAMERA_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>firewatch camera check</title>
  <style>
    body { margin: 0; background: #111; color: #ccc; font: 14px monospace; text-align: center; }
    img { max-width: 100%; margin-top: 12px; border: 1px solid #333; }
  </style>
</head>
<body>
  <p>Camera check: if you can see live video below, this device works with firewatch.</p>
  <img src="/stream" alt="camera stream" />
</body>
</html>
"#;
