//! Process-wide detection state.
//!
//! A single mutex guards the whole record, so every read is a consistent
//! snapshot and every write lands all of its fields at once. The frame counter
//! shares the lock with the hazard fields.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Local};
use ml_core::{Confidence, HazardType, Verdict};
use serde::Serialize;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Status {
    Starting,
    Running,
    Stopped,
    Error,
}

impl Status {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, Status::Stopped | Status::Error)
    }

    /// `starting → running → {stopped | error}`; terminal states never change.
    pub(crate) fn can_transition_to(self, next: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Status::Starting, Status::Running) => true,
            (Status::Starting | Status::Running, Status::Stopped | Status::Error) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DetectionState {
    pub(crate) alert: bool,
    #[serde(rename = "type")]
    pub(crate) hazard: HazardType,
    pub(crate) confidence: Confidence,
    pub(crate) description: String,
    pub(crate) latency_ms: u64,
    pub(crate) frame_count: u64,
    pub(crate) alert_count: u64,
    pub(crate) last_alert: Option<DateTime<Local>>,
    pub(crate) source: String,
    pub(crate) status: Status,
    pub(crate) log_path: String,
}

impl DetectionState {
    fn initial(log_path: &Path) -> Self {
        Self {
            alert: false,
            hazard: HazardType::None,
            confidence: Confidence::Low,
            description: "Initialising...".to_string(),
            latency_ms: 0,
            frame_count: 0,
            alert_count: 0,
            last_alert: None,
            source: "-".to_string(),
            status: Status::Starting,
            log_path: log_path.display().to_string(),
        }
    }
}

/// Owner of the shared [`DetectionState`].
pub(crate) struct StateStore {
    inner: Mutex<DetectionState>,
}

impl StateStore {
    pub(crate) fn new(log_path: &Path) -> Self {
        Self {
            inner: Mutex::new(DetectionState::initial(log_path)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetectionState> {
        // Writers never leave the record half-updated, so a poisoned guard is still coherent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> DetectionState {
        self.lock().clone()
    }

    /// Advance the frame counter and return a snapshot taken under the same lock.
    pub(crate) fn record_frame(&self, frame_number: u64) -> DetectionState {
        let mut guard = self.lock();
        guard.frame_count = guard.frame_count.max(frame_number);
        guard.clone()
    }

    pub(crate) fn set_source(&self, label: &str) {
        self.lock().source = label.to_string();
    }

    /// Apply a status transition; returns `false` when it is not allowed.
    pub(crate) fn transition(&self, next: Status) -> bool {
        let mut guard = self.lock();
        if guard.status == next {
            return true;
        }
        if !guard.status.can_transition_to(next) {
            debug!(from = ?guard.status, to = ?next, "ignoring status transition");
            return false;
        }
        guard.status = next;
        true
    }

    /// Record a completed classification. Expects a normalized verdict.
    pub(crate) fn apply_verdict(
        &self,
        verdict: &Verdict,
        latency: Duration,
        now: DateTime<Local>,
    ) -> DetectionState {
        let mut guard = self.lock();
        guard.alert = verdict.detected;
        guard.hazard = verdict.hazard;
        guard.confidence = verdict.confidence;
        guard.description = verdict.description.clone();
        guard.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        if verdict.detected {
            guard.alert_count += 1;
            guard.last_alert = Some(now);
        }
        guard.clone()
    }

    /// Record a failed classification; hazard fields keep their previous values.
    pub(crate) fn record_failure(&self, description: String) {
        self.lock().description = description;
    }
}
