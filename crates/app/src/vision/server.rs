//! Actix Web server exposing the MJPEG stream, the detection state, and the
//! dashboard.
//!
//! The server runs its own actix system on a dedicated thread so the frame
//! loop never shares a runtime with network I/O. Every stream client gets an
//! independent async stream that re-reads the published image on each tick;
//! a slow or vanished client only ever affects its own stream.

use std::{
    path::PathBuf,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::{Method, header},
    web::{self, Bytes},
};
use anyhow::{Context, Result, bail};
use async_stream::stream;
use futures_util::Stream;
use tokio::{sync::oneshot, time::MissedTickBehavior};
use tracing::{error, info};

use crate::vision::{
    data::{FramePacket, PublishedImage},
    state::StateStore,
    telemetry::{prometheus_handle, spawn_thread},
};

pub(crate) const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Where `/` and `/index.html` come from.
#[derive(Clone, Debug)]
pub(crate) enum IndexPage {
    /// Read from disk on every request so edits show up without a restart.
    File(PathBuf),
    Inline(&'static str),
}

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) published: PublishedImage,
    pub(crate) state: Arc<StateStore>,
    pub(crate) index: IndexPage,
    pub(crate) frame_interval: Duration,
}

#[derive(Clone, Debug)]
pub(crate) struct ServerOptions {
    pub(crate) bind: String,
    pub(crate) port: u16,
}

/// Handle for the server thread.
pub(crate) struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Stop accepting connections and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Bind the server on its own thread; returns once the socket is listening.
pub(crate) fn spawn_stream_server(options: ServerOptions, shared: ServerState) -> Result<StreamServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
    let data = web::Data::new(shared);
    let address = (options.bind.clone(), options.port);

    let handle = spawn_thread("firewatch-http", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = match HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
                .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
                .bind(address)
            {
                Ok(server) => server.run(),
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return Ok(());
                }
            };
            let _ = ready_tx.send(Ok(()));

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamServer {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }),
        Ok(Err(reason)) => {
            let _ = handle.join();
            bail!(
                "failed to bind HTTP server on {}:{}: {reason}",
                options.bind,
                options.port
            )
        }
        Err(_) => bail!("HTTP server thread exited before binding"),
    }
}

/// HEAD is answered for every path, including the ones with a GET handler.
pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(["/stream", "/stream.mjpg"])
            .route(web::get().to(stream_handler))
            .route(web::head().to(fallback_handler)),
    )
    .service(
        web::resource("/api/state")
            .route(web::get().to(state_handler))
            .route(web::head().to(fallback_handler)),
    )
    .service(
        web::resource(["/", "/index.html"])
            .route(web::get().to(index_handler))
            .route(web::head().to(fallback_handler)),
    )
    .service(
        web::resource("/frame.jpg")
            .route(web::get().to(frame_handler))
            .route(web::head().to(fallback_handler)),
    )
    .service(
        web::resource("/metrics")
            .route(web::get().to(metrics_handler))
            .route(web::head().to(fallback_handler)),
    )
    .default_service(web::to(fallback_handler));
}

/// One multipart part: boundary, part headers, JPEG body, trailing CRLF.
///
/// `X-Timestamp` is the capture time in Unix milliseconds.
pub(crate) fn multipart_chunk(packet: &FramePacket) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Sequence: {}\r\nX-Timestamp: {}\r\n\r\n",
        packet.jpeg.len(),
        packet.frame_number,
        packet.timestamp_ms
    );
    let mut payload = Vec::with_capacity(header.len() + packet.jpeg.len() + 2);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(&packet.jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Tracks one connected stream client for the lifetime of its stream.
struct ClientGuard;

impl ClientGuard {
    fn connect() -> Self {
        metrics::gauge!("firewatch_stream_clients").increment(1.0);
        info!("stream client connected");
        ClientGuard
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        metrics::gauge!("firewatch_stream_clients").decrement(1.0);
        info!("stream client disconnected");
    }
}

/// Per-client MJPEG body. Ticks at `interval` and skips ticks with no image yet.
pub(crate) fn mjpeg_stream(
    published: PublishedImage,
    interval: Duration,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    stream! {
        let _client = ClientGuard::connect();
        let mut ticker = actix_web::rt::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(packet) = published.latest() {
                yield Ok::<Bytes, actix_web::Error>(multipart_chunk(&packet));
            }
        }
    }
}

async fn stream_handler(data: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, MJPEG_CONTENT_TYPE))
        .insert_header((header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"))
        .insert_header((header::PRAGMA, "no-cache"))
        .insert_header((header::EXPIRES, "0"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .streaming(mjpeg_stream(data.published.clone(), data.frame_interval))
}

async fn state_handler(data: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(data.state.snapshot())
}

async fn index_handler(data: web::Data<ServerState>) -> HttpResponse {
    let path = match &data.index {
        IndexPage::Inline(html) => {
            return HttpResponse::Ok()
                .content_type("text/html; charset=utf-8")
                .body(*html);
        }
        IndexPage::File(path) => path.clone(),
    };

    let read_path = path.clone();
    match web::block(move || std::fs::read(read_path)).await {
        Ok(Ok(html)) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(html),
        Ok(Err(err)) => HttpResponse::NotFound()
            .content_type("text/plain; charset=utf-8")
            .body(format!("dashboard not found at {}: {err}", path.display())),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

/// Return the latest published JPEG.
async fn frame_handler(data: web::Data<ServerState>) -> HttpResponse {
    match data.published.latest() {
        Some(packet) => HttpResponse::Ok()
            .insert_header(("X-Sequence", packet.frame_number.to_string()))
            .insert_header(("X-Timestamp", packet.timestamp_ms.to_string()))
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .content_type("image/jpeg")
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn metrics_handler() -> HttpResponse {
    match prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

async fn fallback_handler(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::HEAD {
        let mut response = HttpResponse::Ok();
        if req.path().starts_with("/stream") {
            response.insert_header((header::CONTENT_TYPE, MJPEG_CONTENT_TYPE));
        }
        return response.finish();
    }
    HttpResponse::NotFound()
        .content_type("text/plain; charset=utf-8")
        .body(format!("no route for {}", req.path()))
}
