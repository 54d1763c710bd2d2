//! Dedicated metrics HTTP server, carried over from this repo's own
//! observability server (`telemetry::server::start_observability_server`),
//! trimmed to the two endpoints a detector process needs: `/metrics` and
//! `/healthz`.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn text_response(status: hyper::StatusCode, body: &str) -> hyper::Response<BoxBody> {
    let boxed = Full::new(Bytes::from(body.to_string())).map_err(|never| match never {}).boxed();
    let mut resp = hyper::Response::new(boxed);
    *resp.status_mut() = status;
    resp
}

fn render_metrics(registry: &Registry) -> hyper::Response<BoxBody> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buf = Vec::new();
    match encoder.encode(&metric_families, &mut buf) {
        Ok(()) => {
            let body = String::from_utf8_lossy(&buf).into_owned();
            text_response(hyper::StatusCode::OK, &body)
        }
        Err(e) => {
            warn!(error = %e, "failed to encode metrics");
            text_response(hyper::StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
        }
    }
}

/// Serves `/metrics` (Prometheus text exposition) and `/healthz` (live
/// while `force_quit` has not been set) on `port` until a shutdown signal
/// arrives or `force_quit` flips.
pub async fn start_metrics_server(
    port: u16,
    registry: Registry,
    force_quit: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "metrics server started");

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| std::io::Error::other(format!("failed to install SIGTERM handler: {e}")))?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| std::io::Error::other(format!("failed to install SIGINT handler: {e}")))?;

    loop {
        if force_quit.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            _ = sigterm.recv() => {
                info!("metrics server: received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("metrics server: received SIGINT, shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "metrics server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                let force_quit = force_quit.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let registry = registry.clone();
                        let force_quit = force_quit.clone();
                        async move {
                            let resp = match req.uri().path() {
                                "/metrics" => render_metrics(&registry),
                                "/healthz" => {
                                    if force_quit.load(Ordering::Acquire) {
                                        text_response(hyper::StatusCode::SERVICE_UNAVAILABLE, "shutting down")
                                    } else {
                                        text_response(hyper::StatusCode::OK, "ok")
                                    }
                                }
                                _ => text_response(hyper::StatusCode::NOT_FOUND, "not found"),
                            };
                            Ok::<_, hyper::Error>(resp)
                        }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "metrics server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("metrics server stopped");
    Ok(())
}
