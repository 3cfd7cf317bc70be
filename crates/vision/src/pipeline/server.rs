//! Actix Web control server: start/stop endpoints, the MJPEG live feed, and a
//! few read-only views over the display slot.
//!
//! The server runs on a dedicated thread with its own Actix system so the
//! session thread never touches the async runtime.

use std::{
    net::SocketAddr,
    sync::{Arc, mpsc},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::pipeline::{
    data::{ControlResponse, StatusResponse},
    encoding::{MULTIPART_BOUNDARY, encode_jpeg, multipart_part},
    lifecycle::SessionController,
    supervisor::target_recent,
    telemetry,
};

const STREAM_TICK: Duration = Duration::from_millis(33);

/// Handle for the control server thread.
pub struct ControlServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl ControlServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the server to stop and block until the thread exits.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Register every route on an Actix service config.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/start", web::post().to(start_handler))
        .route("/stop", web::post().to(stop_handler))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/frame.jpg", web::get().to(frame_handler))
        .route("/status", web::get().to(status_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Bind `bind` and serve the control API on a background thread.
///
/// Returns once the listener is bound, or with the bind error.
pub fn spawn_control_server(
    controller: Arc<SessionController>,
    bind: SocketAddr,
) -> Result<ControlServer> {
    let controller = web::Data::from(controller);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<SocketAddr, String>>();

    let handle = telemetry::spawn_thread("trigger-http", move || {
        let outcome = actix_web::rt::System::new().block_on(async move {
            let bound = HttpServer::new(move || {
                App::new()
                    .app_data(controller.clone())
                    .configure(configure)
            })
            .workers(2)
            .shutdown_timeout(5)
            .bind(bind);
            let server = match bound {
                Ok(server) => server,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return Ok(());
                }
            };
            let local_addr = server.addrs().first().copied().unwrap_or(bind);
            let server = server.run();
            let _ = ready_tx.send(Ok(local_addr));

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = outcome {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn control server thread")?;

    let local_addr = match ready_rx.recv() {
        Ok(Ok(addr)) => addr,
        Ok(Err(reason)) => {
            let _ = handle.join();
            return Err(anyhow!("failed to bind control server on {bind}: {reason}"));
        }
        Err(_) => {
            let _ = handle.join();
            return Err(anyhow!("control server thread exited before binding {bind}"));
        }
    };
    info!("Control server listening on http://{local_addr}");

    Ok(ControlServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
        local_addr,
    })
}

async fn start_handler(controller: web::Data<SessionController>) -> HttpResponse {
    match web::block(move || controller.start()).await {
        Ok(Ok(status)) => HttpResponse::Ok().json(ControlResponse {
            status: status.as_str(),
        }),
        Ok(Err(err)) => HttpResponse::InternalServerError().body(format!("{err:#}")),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

async fn stop_handler(controller: web::Data<SessionController>) -> HttpResponse {
    match web::block(move || controller.stop()).await {
        Ok(status) => HttpResponse::Ok().json(ControlResponse {
            status: status.as_str(),
        }),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

/// Tracks open live-feed connections in the `trigger_stream_clients` gauge.
struct StreamClient;

impl StreamClient {
    fn connect() -> Self {
        metrics::gauge!("trigger_stream_clients").increment(1.0);
        StreamClient
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        metrics::gauge!("trigger_stream_clients").decrement(1.0);
    }
}

/// Stream the display slot as `multipart/x-mixed-replace` while a session runs.
async fn video_feed_handler(controller: web::Data<SessionController>) -> HttpResponse {
    let quality = controller.config().jpeg_quality;
    let stream = stream! {
        let _client = StreamClient::connect();
        let mut last_sent = 0_u64;
        let mut interval = actix_web::rt::time::interval(STREAM_TICK);
        loop {
            interval.tick().await;
            if !controller.is_running() {
                debug!("Session not running; closing live feed");
                break;
            }
            let Some(published) = controller.display().latest() else {
                continue;
            };
            if published.sequence == last_sent {
                continue;
            }
            match encode_jpeg(&published.frame, quality) {
                Ok(jpeg) => {
                    last_sent = published.sequence;
                    yield Ok::<Bytes, actix_web::Error>(multipart_part(&jpeg, published.sequence));
                }
                Err(err) => warn!("Skipping frame {}: {err:#}", published.sequence),
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header((
            "Content-Type",
            format!("multipart/x-mixed-replace; boundary={MULTIPART_BOUNDARY}"),
        ))
        .streaming(stream)
}

/// Return the latest displayed frame as a single JPEG.
async fn frame_handler(controller: web::Data<SessionController>) -> HttpResponse {
    let Some(published) = controller.display().latest() else {
        return HttpResponse::NoContent().finish();
    };
    match encode_jpeg(&published.frame, controller.config().jpeg_quality) {
        Ok(jpeg) => HttpResponse::Ok()
            .append_header(("X-Sequence", published.sequence.to_string()))
            .append_header(("X-Mode", published.mode.label()))
            .content_type("image/jpeg")
            .body(jpeg),
        Err(err) => HttpResponse::InternalServerError().body(format!("{err:#}")),
    }
}

async fn status_handler(controller: web::Data<SessionController>) -> HttpResponse {
    let snapshot = controller.display().snapshot();
    let now = Instant::now();
    let grace = controller.config().policy.resume_grace;
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(StatusResponse {
            running: controller.is_running(),
            mode: snapshot.mode,
            sequence: snapshot.sequence,
            target_recent: target_recent(snapshot.last_target_seen, now, grace),
            target_absent_ms: snapshot
                .target_absent_for(now)
                .map(|absent| absent.as_millis() as u64),
            detections: &snapshot.detections,
            last_session: controller.last_outcome(),
        })
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}
