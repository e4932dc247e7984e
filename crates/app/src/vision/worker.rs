//! Classification worker: consumes dispatched frames one at a time and folds
//! each verdict into the shared detection state.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Local;
use image::RgbImage;
use ml_core::{Classifier, ClassifyError, Verdict, parse_verdict};
use tracing::{info, warn};

use crate::vision::{
    alert::AlertSink,
    dispatch::DispatchReceiver,
    encoding::{encode_jpeg, enhance_for_smoke},
    state::StateStore,
};

const ERROR_REASON_MAX_CHARS: usize = 60;

#[derive(Clone, Copy, Debug)]
pub(crate) struct WorkerSettings {
    pub(crate) jpeg_quality: u8,
    pub(crate) smoke_enhance: bool,
}

enum CycleError {
    Encode(anyhow::Error),
    Classify(ClassifyError),
}

impl CycleError {
    fn reason(&self) -> &'static str {
        match self {
            CycleError::Encode(_) => "encode",
            CycleError::Classify(err) => err.kind(),
        }
    }

    fn message(&self) -> String {
        match self {
            CycleError::Encode(err) => err.to_string(),
            CycleError::Classify(err) => err.to_string(),
        }
    }
}

impl From<ClassifyError> for CycleError {
    fn from(err: ClassifyError) -> Self {
        CycleError::Classify(err)
    }
}

pub(crate) struct ClassificationWorker {
    classifier: Box<dyn Classifier>,
    state: Arc<StateStore>,
    alert: Arc<dyn AlertSink>,
    settings: WorkerSettings,
}

impl ClassificationWorker {
    pub(crate) fn new(
        classifier: Box<dyn Classifier>,
        state: Arc<StateStore>,
        alert: Arc<dyn AlertSink>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            classifier,
            state,
            alert,
            settings,
        }
    }

    /// Serve the queue until every producer is gone.
    pub(crate) fn run(mut self, queue: DispatchReceiver<RgbImage>) {
        while let Some(image) = queue.take() {
            self.handle(&image);
        }
        info!("classification queue closed; worker exiting");
    }

    /// Run one classification cycle. Failures are recorded, never propagated.
    pub(crate) fn handle(&mut self, image: &RgbImage) {
        let span = tracing::info_span!(
            "classify",
            width = image.width(),
            height = image.height(),
            latency_ms = tracing::field::Empty
        );
        let _guard = span.enter();

        match self.classify_once(image) {
            Ok((verdict, latency)) => {
                span.record("latency_ms", latency.as_millis() as u64);
                metrics::histogram!("firewatch_classify_seconds").record(latency.as_secs_f64());
                let snapshot = self.state.apply_verdict(&verdict, latency, Local::now());
                if verdict.detected {
                    metrics::counter!("firewatch_alerts_total").increment(1);
                    warn!(
                        hazard = %verdict.hazard,
                        confidence = %verdict.confidence,
                        alerts = snapshot.alert_count,
                        "HAZARD DETECTED: {}",
                        verdict.description
                    );
                    self.alert.trigger(verdict.hazard);
                } else {
                    info!(
                        confidence = %verdict.confidence,
                        latency_ms = snapshot.latency_ms,
                        "clear: {}",
                        verdict.description
                    );
                }
            }
            Err(err) => {
                metrics::counter!("firewatch_classify_failures_total", "reason" => err.reason())
                    .increment(1);
                let message = err.message();
                warn!(reason = err.reason(), "classification failed: {message}");
                self.state.record_failure(failure_description(&message));
            }
        }
    }

    fn classify_once(&mut self, image: &RgbImage) -> Result<(Verdict, Duration), CycleError> {
        let jpeg = if self.settings.smoke_enhance {
            encode_jpeg(&enhance_for_smoke(image), self.settings.jpeg_quality)
        } else {
            encode_jpeg(image, self.settings.jpeg_quality)
        }
        .map_err(CycleError::Encode)?;

        let started = Instant::now();
        let raw = self.classifier.classify(&jpeg)?;
        let latency = started.elapsed();

        let verdict = parse_verdict(&raw).map_err(ClassifyError::from)?;
        Ok((verdict.normalized(), latency))
    }
}

fn failure_description(reason: &str) -> String {
    let short: String = reason.chars().take(ERROR_REASON_MAX_CHARS).collect();
    format!("VLM Error: {short}")
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, path::Path};

    use image::Rgb;
    use ml_core::HazardType;

    use super::*;
    use crate::vision::{alert::tests::RecordingSink, dispatch::dispatch_queue};

    struct ScriptedClassifier {
        replies: VecDeque<Result<String, ClassifyError>>,
        seen_jpegs: usize,
    }

    impl ScriptedClassifier {
        fn new(replies: Vec<Result<String, ClassifyError>>) -> Self {
            Self {
                replies: replies.into(),
                seen_jpegs: 0,
            }
        }
    }

    impl Classifier for ScriptedClassifier {
        fn classify(&mut self, jpeg: &[u8]) -> Result<String, ClassifyError> {
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            self.seen_jpegs += 1;
            self.replies
                .pop_front()
                .unwrap_or(Err(ClassifyError::EmptyCompletion))
        }
    }

    fn worker(
        replies: Vec<Result<String, ClassifyError>>,
    ) -> (ClassificationWorker, Arc<StateStore>, Arc<RecordingSink>) {
        let state = Arc::new(StateStore::new(Path::new("logs/test.log")));
        let sink = Arc::new(RecordingSink::default());
        let worker = ClassificationWorker::new(
            Box::new(ScriptedClassifier::new(replies)),
            state.clone(),
            sink.clone(),
            WorkerSettings {
                jpeg_quality: 60,
                smoke_enhance: true,
            },
        );
        (worker, state, sink)
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(32, 18, Rgb([90, 90, 90]))
    }

    #[test]
    fn alerts_are_counted_only_for_hazards() {
        let (mut worker, state, sink) = worker(vec![
            Ok(r#"{"detected": true, "type": "fire", "confidence": "high", "description": "flames"}"#.into()),
            Ok(r#"{"detected": false, "type": "none", "confidence": "high", "description": "clear"}"#.into()),
            Ok(r#"{"detected": false, "type": "fire", "confidence": "low", "description": "glare"}"#.into()),
        ]);

        for _ in 0..3 {
            worker.handle(&frame());
        }

        let snapshot = state.snapshot();
        assert_eq!(snapshot.alert_count, 1);
        assert!(!snapshot.alert);
        assert_eq!(snapshot.hazard, HazardType::None);
        assert_eq!(snapshot.description, "glare");
        assert_eq!(*sink.hazards.lock().unwrap(), vec![HazardType::Fire]);
    }

    #[test]
    fn unparseable_reply_keeps_previous_verdict() {
        let (mut worker, state, sink) = worker(vec![
            Ok("```json\n{\"detected\": true, \"type\": \"smoke\", \"confidence\": \"medium\", \"description\": \"haze\"}\n```".into()),
            Ok("I cannot help with that.".into()),
        ]);

        worker.handle(&frame());
        worker.handle(&frame());

        let snapshot = state.snapshot();
        assert!(snapshot.alert);
        assert_eq!(snapshot.hazard, HazardType::Smoke);
        assert_eq!(snapshot.alert_count, 1);
        assert!(snapshot.description.starts_with("VLM Error: "));
        assert_eq!(sink.hazards.lock().unwrap().len(), 1);
    }

    #[test]
    fn transport_errors_are_truncated_and_survivable() {
        let (mut worker, state, _sink) = worker(vec![
            Err(ClassifyError::Status {
                status: 503,
                body: "x".repeat(500),
            }),
            Ok(r#"{"detected": false}"#.into()),
        ]);

        worker.handle(&frame());
        let failed = state.snapshot();
        assert_eq!(
            failed.description.chars().count(),
            "VLM Error: ".len() + ERROR_REASON_MAX_CHARS
        );
        assert_eq!(failed.latency_ms, 0);

        worker.handle(&frame());
        assert_eq!(state.snapshot().description, "");
    }

    #[test]
    fn run_drains_queue_until_producers_drop() {
        let (worker, state, _sink) = worker(vec![Ok(
            r#"{"detected": true, "type": "both", "confidence": "high", "description": "fire and smoke"}"#
                .into(),
        )]);
        let (tx, rx) = dispatch_queue();
        tx.offer(frame());
        drop(tx);

        worker.run(rx);
        assert_eq!(state.snapshot().alert_count, 1);
        assert_eq!(state.snapshot().hazard, HazardType::Both);
    }
}
