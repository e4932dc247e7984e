//! Fire and smoke detection pipeline.
//!
//! The module is split into focused submodules:
//! - `config`: CLI/env configuration parsing.
//! - `pipeline`: The frame loop (capture → overlay → publish → dispatch).
//! - `dispatch`: Single-slot, latest-wins handoff to the classifier.
//! - `worker`: Classification worker and verdict bookkeeping.
//! - `state`: Shared detection state.
//! - `server`: Actix Web stream, state, and dashboard endpoints.
//! - `encoding` / `annotation`: Pixel conversion, JPEG, and overlay drawing.
//! - `alert`: Audible alarm.
//! - `telemetry`: Tracing, run log, and Prometheus metrics.
//! - `diagnostics`: The `debug-camera` helper.

pub use config::{DetectorCliArgs, DetectorConfig};
pub use diagnostics::{DebugCameraArgs, run_debug_camera};

mod alert;
mod annotation;
mod config;
mod data;
mod diagnostics;
mod dispatch;
mod encoding;
mod pipeline;
mod server;
mod state;
mod telemetry;
mod worker;

use std::{
    path::Path,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use image::RgbImage;
use ml_core::{FIRE_PROMPT, OllamaClassifier, OllamaSettings};
use tracing::{error, info, warn};
use video_ingest::{open_source, source_label};

use crate::vision::{
    alert::AlertSound,
    data::PublishedImage,
    dispatch::dispatch_queue,
    pipeline::{FrameLoop, FrameLoopSettings},
    server::{IndexPage, ServerOptions, ServerState, spawn_stream_server},
    state::{StateStore, Status},
    telemetry::spawn_thread,
    worker::{ClassificationWorker, WorkerSettings},
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);
const FRAME_LOOP_GRACE: Duration = Duration::from_secs(3);

/// Process-wide shutdown flag, raised by SIGINT/SIGTERM.
pub(crate) fn shutdown_flag() -> Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
        flag
    })
    .clone()
}

/// Run the detector until interrupted.
///
/// A failing video source stops the frame loop and marks the state `error`,
/// but the HTTP server keeps serving so the failure is visible remotely.
pub fn run(config: DetectorConfig) -> Result<()> {
    let log_path = telemetry::init_tracing(&config.log_dir)?;
    let _ = telemetry::init_metrics_recorder();
    let shutdown = shutdown_flag();

    let span = tracing::info_span!(
        "firewatch",
        source = %config.source,
        model = %config.model,
        frame_skip = config.frame_skip
    );
    let _span_guard = span.enter();

    let state = Arc::new(StateStore::new(&log_path));
    state.set_source(&source_label(&config.source));
    let published = PublishedImage::default();

    let classifier = OllamaClassifier::new(OllamaSettings {
        endpoint: config.vlm_url.clone(),
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        timeout: config.vlm_timeout,
        prompt: FIRE_PROMPT.to_string(),
    })
    .context("Failed to build classifier client")?;

    let server = spawn_stream_server(
        ServerOptions {
            bind: config.bind.clone(),
            port: config.port,
        },
        ServerState {
            published: published.clone(),
            state: state.clone(),
            index: IndexPage::File(config.index_path.clone()),
            frame_interval: config.frame_interval(),
        },
    )
    .context("Failed to start HTTP server")?;
    log_banner(&config, &log_path);

    let (dispatch_tx, dispatch_rx) = dispatch_queue::<RgbImage>();
    let worker = ClassificationWorker::new(
        Box::new(classifier),
        state.clone(),
        Arc::new(AlertSound::new(
            config.alert_sound,
            config.alert_sound_file.clone(),
        )),
        WorkerSettings {
            jpeg_quality: config.vlm_quality,
            smoke_enhance: config.smoke_enhance,
        },
    );
    // Detached: an in-flight classifier call is abandoned at shutdown.
    spawn_thread("firewatch-classifier", move || worker.run(dispatch_rx))
        .context("Failed to spawn classification thread")?;

    let frame_loop = match open_source(&config.source, config.stream_size, config.backend) {
        Ok(source) => {
            info!(source = %source.label(), kind = source.kind().label(), "video source opened");
            let frame_loop = FrameLoop::new(
                source,
                state.clone(),
                published,
                dispatch_tx,
                FrameLoopSettings {
                    stream_size: config.stream_size,
                    stream_quality: config.stream_quality,
                    classify_size: config.vlm_size,
                    frame_skip: config.frame_skip,
                    interval: config.frame_interval(),
                },
            );
            let loop_shutdown = shutdown.clone();
            Some(
                spawn_thread("firewatch-frames", move || frame_loop.run(loop_shutdown))
                    .context("Failed to spawn frame loop thread")?,
            )
        }
        Err(err) => {
            error!("Failed to open video source {}: {err}", config.source);
            state.transition(Status::Error);
            None
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(SHUTDOWN_POLL);
    }
    info!("shutdown requested");

    server.stop();
    if let Some(handle) = frame_loop {
        if wait_for_thread(&handle, FRAME_LOOP_GRACE) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("frame loop ended with error: {err:#}"),
                Err(_) => error!("frame loop thread panicked"),
            }
        } else {
            // Blocked in a source read; the process exits without it.
            warn!(
                "frame loop did not stop within {:?}; abandoning it",
                FRAME_LOOP_GRACE
            );
        }
    }
    state.transition(Status::Stopped);

    let snapshot = state.snapshot();
    info!(
        frames = snapshot.frame_count,
        alerts = snapshot.alert_count,
        "firewatch stopped"
    );
    Ok(())
}

/// Poll `handle` until its thread finishes or `grace` elapses.
fn wait_for_thread<T>(handle: &JoinHandle<T>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    true
}

fn log_banner(config: &DetectorConfig, log_path: &Path) {
    let host = if config.bind == "0.0.0.0" {
        "localhost"
    } else {
        config.bind.as_str()
    };
    let stream = match config.stream_size {
        (0, 0) => "native".to_string(),
        (w, h) => format!("{w}x{h}"),
    };
    info!("dashboard: http://{host}:{}/", config.port);
    info!("stream:    http://{host}:{}/stream", config.port);
    info!("state:     http://{host}:{}/api/state", config.port);
    info!("log file:  {}", log_path.display());
    info!(
        "stream {stream} q{} @ {} fps; VLM {}x{} q{} every {} frames via {} ({})",
        config.stream_quality,
        config.stream_fps,
        config.vlm_size.0,
        config.vlm_size.1,
        config.vlm_quality,
        config.frame_skip,
        config.model,
        config.vlm_url
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_thread_is_abandoned_after_grace() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let stuck = thread::spawn(move || {
            let _ = release_rx.recv();
        });
        let started = Instant::now();
        assert!(!wait_for_thread(&stuck, Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(release_tx);
        assert!(wait_for_thread(&stuck, Duration::from_secs(5)));
        stuck.join().unwrap();
    }
}
