//! `debug-camera`: find a working capture device and stream it raw.

use std::{
    path::Path,
    sync::{Arc, atomic::Ordering},
    thread,
    time::Instant,
};

use actix_web::web::Bytes;
use anyhow::{Context, Result, anyhow};
use clap::Args;
use image::Rgb;
use tracing::{info, warn};
use video_ingest::{CaptureBackend, DeviceProbe, open_source, probe_devices};

use crate::{
    html::DEBUG_CAMERA_HTML,
    vision::{
        annotation::{blend_rect, draw_text},
        data::{FramePacket, PublishedImage},
        encoding::{encode_jpeg, frame_to_rgb},
        pipeline::remaining_interval,
        server::{IndexPage, ServerOptions, ServerState, spawn_stream_server},
        shutdown_flag,
        state::{StateStore, Status},
    },
};

const DEBUG_FPS: u32 = 15;

/// CLI arguments accepted by the `debug-camera` subcommand.
#[derive(Debug, Args)]
pub struct DebugCameraArgs {
    /// Stream this device instead of the first working one.
    #[arg(long, value_name = "INDEX")]
    device: Option<i32>,

    /// Probe device indices below this value.
    #[arg(long, value_name = "N", default_value_t = 6)]
    max_index: i32,

    #[arg(long, env = "FIREWATCH_DEBUG_PORT", default_value_t = 8090)]
    port: u16,

    #[arg(long, env = "FIREWATCH_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "FIREWATCH_CAPTURE_BACKEND", default_value = "ffmpeg")]
    backend: CaptureBackend,

    #[arg(long, value_name = "PX", default_value_t = 640)]
    width: u32,

    #[arg(long, value_name = "PX", default_value_t = 480)]
    height: u32,
}

/// Pick the device to stream: the explicit one, or the first that produced a frame.
fn choose_device(requested: Option<i32>, probes: &[DeviceProbe]) -> Option<i32> {
    requested.or_else(|| probes.iter().find(|probe| probe.is_ready()).map(DeviceProbe::index))
}

pub fn run_debug_camera(args: DebugCameraArgs) -> Result<()> {
    let size = (args.width, args.height);
    info!("probing camera indices 0..{}", args.max_index);
    let probes = probe_devices(args.max_index, size, args.backend);
    for probe in &probes {
        match probe {
            DeviceProbe::Ready {
                index,
                width,
                height,
            } => info!("camera {index}: OK ({width}x{height})"),
            DeviceProbe::NoFrames { index } => warn!("camera {index}: opened but produced no frames"),
            DeviceProbe::Unavailable { index, reason } => info!("camera {index}: unavailable ({reason})"),
        }
    }

    let index = choose_device(args.device, &probes)
        .ok_or_else(|| anyhow!("no working camera found in indices 0..{}", args.max_index))?;
    let mut source = open_source(&index.to_string(), size, args.backend)
        .with_context(|| format!("Failed to open camera {index}"))?;

    let shutdown = shutdown_flag();
    let published = PublishedImage::default();
    let state = Arc::new(StateStore::new(Path::new("")));
    state.set_source(&source.label());
    state.transition(Status::Running);

    let interval = std::time::Duration::from_secs_f64(1.0 / f64::from(DEBUG_FPS));
    let server = spawn_stream_server(
        ServerOptions {
            bind: args.bind.clone(),
            port: args.port,
        },
        ServerState {
            published: published.clone(),
            state: state.clone(),
            index: IndexPage::Inline(DEBUG_CAMERA_HTML),
            frame_interval: interval,
        },
    )
    .context("Failed to start debug stream server")?;
    info!(
        "streaming camera {index} at http://localhost:{}/ (Ctrl+C to stop)",
        args.port
    );

    let started = Instant::now();
    let mut frame_number: u64 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        let tick = Instant::now();
        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("camera {index} stopped producing frames");
                state.transition(Status::Error);
                break;
            }
            Err(err) => {
                warn!("camera {index} read failed: {err}");
                state.transition(Status::Error);
                break;
            }
        };
        frame_number += 1;
        let timestamp_ms = frame.timestamp_ms;
        state.record_frame(frame_number);

        let mut image = frame_to_rgb(frame)?;
        let fps = frame_number as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
        let label = format!("CAMERA {index}  FRAME {frame_number}  {fps:.1} FPS");
        let width = image.width() as i32;
        blend_rect(&mut image, 0, 0, width, 24, Rgb([0, 0, 0]), 0.6);
        draw_text(&mut image, 8, 5, &label, Rgb([70, 210, 0]), 2);

        match encode_jpeg(&image, 75) {
            Ok(jpeg) => published.publish(FramePacket {
                jpeg: Bytes::from(jpeg),
                frame_number,
                timestamp_ms,
            }),
            Err(err) => warn!("skipping frame {frame_number}: {err:#}"),
        }

        if let Some(wait) = remaining_interval(interval, tick.elapsed()) {
            thread::sleep(wait);
        }
    }

    state.transition(Status::Stopped);
    server.stop();
    info!(frames = frame_number, "debug stream stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_device_beats_probe_results() {
        let probes = vec![
            DeviceProbe::Unavailable {
                index: 0,
                reason: "busy".into(),
            },
            DeviceProbe::NoFrames { index: 1 },
            DeviceProbe::Ready {
                index: 2,
                width: 640,
                height: 480,
            },
            DeviceProbe::Ready {
                index: 3,
                width: 640,
                height: 480,
            },
        ];
        assert_eq!(choose_device(None, &probes), Some(2));
        assert_eq!(choose_device(Some(0), &probes), Some(0));
        assert_eq!(choose_device(None, &probes[..2]), None);
    }
}
