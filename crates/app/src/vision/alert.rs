//! Audible alarm fired when a classification reports a hazard.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use ml_core::HazardType;
use tracing::{debug, warn};

use crate::vision::telemetry::spawn_thread;

const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receives hazard notifications from the classification worker.
///
/// Implementations must return promptly; the worker is blocked until they do.
pub(crate) trait AlertSink: Send + Sync {
    fn trigger(&self, hazard: HazardType);
}

/// Plays a WAV file through `aplay`, falling back to the terminal bell.
pub(crate) struct AlertSound {
    enabled: bool,
    file: PathBuf,
}

impl AlertSound {
    pub(crate) fn new(enabled: bool, file: PathBuf) -> Self {
        Self { enabled, file }
    }
}

impl AlertSink for AlertSound {
    fn trigger(&self, hazard: HazardType) {
        if !self.enabled {
            return;
        }
        let file = self.file.clone();
        debug!(hazard = %hazard, file = %file.display(), "playing alert sound");
        if let Err(err) = spawn_thread("firewatch-alert", move || play(&file)) {
            warn!("failed to spawn alert sound thread: {err}");
        }
    }
}

fn play(file: &Path) {
    if !file.exists() {
        ring_bell();
        return;
    }

    let mut child = match Command::new("aplay")
        .arg("-q")
        .arg(file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            debug!("aplay unavailable ({err}); using terminal bell");
            ring_bell();
            return;
        }
    };

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return,
            Ok(Some(_)) | Err(_) => {
                ring_bell();
                return;
            }
            Ok(None) if started.elapsed() >= PLAYBACK_TIMEOUT => {
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
        }
    }
}

fn ring_bell() {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records every hazard it is asked to announce.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) hazards: Mutex<Vec<HazardType>>,
    }

    impl AlertSink for RecordingSink {
        fn trigger(&self, hazard: HazardType) {
            self.hazards.lock().unwrap().push(hazard);
        }
    }

    #[test]
    fn disabled_sound_returns_immediately() {
        let sound = AlertSound::new(false, PathBuf::from("/nonexistent.wav"));
        let started = Instant::now();
        sound.trigger(HazardType::Fire);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn missing_file_falls_back_without_blocking() {
        let sound = AlertSound::new(true, PathBuf::from("/nonexistent/alarm.wav"));
        let started = Instant::now();
        sound.trigger(HazardType::Smoke);
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
