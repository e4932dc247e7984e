//! Frame loop: the producer half of the pipeline.
//!
//! Each iteration pulls one frame, publishes an annotated display copy for the
//! streaming server and, every Kth frame, offers a downsampled copy to the
//! classification worker. Offering never blocks, so a slow classifier cannot
//! stall the stream.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use actix_web::web::Bytes;
use anyhow::{Context, Result};
use chrono::Local;
use image::RgbImage;
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, Frame, FrameSource};

use crate::vision::{
    annotation::render_overlay,
    data::{FramePacket, PublishedImage},
    dispatch::DispatchSender,
    encoding::{encode_jpeg, frame_to_rgb, resize_to},
    state::{StateStore, Status},
};

#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameLoopSettings {
    /// Display resolution; 0×0 keeps the native size.
    pub(crate) stream_size: (u32, u32),
    pub(crate) stream_quality: u8,
    pub(crate) classify_size: (u32, u32),
    /// Offer every Kth frame to the classifier.
    pub(crate) frame_skip: u64,
    /// Minimum time between iterations.
    pub(crate) interval: Duration,
}

pub(crate) struct FrameLoop {
    source: Box<dyn FrameSource>,
    state: Arc<StateStore>,
    published: PublishedImage,
    dispatch: DispatchSender<RgbImage>,
    settings: FrameLoopSettings,
    frame_number: u64,
}

impl FrameLoop {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        state: Arc<StateStore>,
        published: PublishedImage,
        dispatch: DispatchSender<RgbImage>,
        settings: FrameLoopSettings,
    ) -> Self {
        Self {
            source,
            state,
            published,
            dispatch,
            settings,
            frame_number: 0,
        }
    }

    /// Produce frames until `shutdown` is raised or the source fails.
    ///
    /// Leaves the state in `stopped` on a clean exit and `error` otherwise.
    pub(crate) fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let span = tracing::info_span!(
            "frame_loop",
            source = %self.source.label(),
            kind = self.source.kind().label(),
            frame_skip = self.settings.frame_skip
        );
        let _guard = span.enter();

        self.state.transition(Status::Running);
        info!("frame loop started");

        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            if let Err(err) = self.step() {
                error!("frame loop stopped: {err:#}");
                self.state.transition(Status::Error);
                return Err(err);
            }
            let elapsed = started.elapsed();
            metrics::histogram!("firewatch_frame_loop_seconds").record(elapsed.as_secs_f64());

            if let Some(wait) = remaining_interval(self.settings.interval, elapsed) {
                thread::sleep(wait);
            }
        }

        self.state.transition(Status::Stopped);
        info!(frames = self.frame_number, "frame loop stopped");
        Ok(())
    }

    /// Run a single produce cycle. Only source failures are returned.
    pub(crate) fn step(&mut self) -> Result<()> {
        let frame = self.next_frame().context("video source failed")?;
        self.frame_number += 1;
        let frame_number = self.frame_number;
        let timestamp_ms = frame.timestamp_ms;

        let snapshot = self.state.record_frame(frame_number);
        metrics::counter!("firewatch_frames_total").increment(1);

        let image = match frame_to_rgb(frame) {
            Ok(image) => image,
            Err(err) => {
                warn!(frame = frame_number, "dropping undecodable frame: {err:#}");
                return Ok(());
            }
        };

        let mut display = resize_to(&image, self.settings.stream_size);
        render_overlay(&mut display, &snapshot, Local::now());
        match encode_jpeg(&display, self.settings.stream_quality) {
            Ok(jpeg) => self.published.publish(FramePacket {
                jpeg: Bytes::from(jpeg),
                frame_number,
                timestamp_ms,
            }),
            Err(err) => warn!(frame = frame_number, "skipping publish: {err:#}"),
        }

        if frame_number % self.settings.frame_skip == 0 {
            let outcome = self
                .dispatch
                .offer(resize_to(&image, self.settings.classify_size));
            metrics::counter!("firewatch_dispatch_total", "outcome" => outcome.label())
                .increment(1);
            debug!(frame = frame_number, outcome = outcome.label(), "offered frame to classifier");
        }
        Ok(())
    }

    /// Pull the next frame. Seekable sources rewind on end-of-file and on
    /// read failures; live sources treat both as fatal.
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let seekable = self.source.kind().is_seekable();
        match self.source.read_frame() {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) if !seekable => {
                return Err(CaptureError::Ended {
                    uri: self.source.label(),
                });
            }
            Ok(None) => debug!(frame = self.frame_number, "end of file; rewinding"),
            Err(err) if !seekable => return Err(err),
            Err(err) => warn!(frame = self.frame_number, "read failed on file source, rewinding: {err}"),
        }

        metrics::counter!("firewatch_source_rewinds_total").increment(1);
        self.source.rewind()?;
        // Still nothing after a rewind: the file is empty.
        self.source.read_frame()?.ok_or_else(|| CaptureError::Empty {
            uri: self.source.label(),
        })
    }
}

/// Time left in the current pacing interval; `None` on overrun.
pub(crate) fn remaining_interval(interval: Duration, elapsed: Duration) -> Option<Duration> {
    interval.checked_sub(elapsed).filter(|wait| !wait.is_zero())
}
