//! HTTP server for the Prometheus endpoint and a JSON stats dump

use super::Metrics;
use crate::allocator::SkbAllocator;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// HTTP server exposing allocator diagnostics
///
/// Counters are pulled from the allocator on every scrape, so the data
/// path never has to know the server exists.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    allocator: SkbAllocator,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, allocator: SkbAllocator, addr: SocketAddr) -> Self {
        Self {
            metrics,
            allocator,
            addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();
            let allocator = self.allocator.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = metrics.clone();
                    let allocator = allocator.clone();
                    async move { handle_request(req, metrics, allocator).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    allocator: SkbAllocator,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            metrics.observe(&allocator.stats());
            for pool in [allocator.cache(), allocator.global_pool()] {
                if let Some(snap) = allocator.pool_stats(pool) {
                    metrics.observe_pool(pool, &snap);
                }
            }

            let encoder = TextEncoder::new();
            let metric_families = metrics.registry.gather();
            let mut buffer = Vec::new();

            match encoder.encode(&metric_families, &mut buffer) {
                Ok(_) => respond(StatusCode::OK, encoder.format_type(), buffer),
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        "Failed to encode metrics",
                    )
                }
            }
        }
        "/stats" => match serde_json::to_vec(&allocator.stats()) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => {
                error!("Failed to encode stats: {}", e);
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to encode stats",
                )
            }
        },
        "/health" | "/healthz" => respond(StatusCode::OK, "text/plain", "OK"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}
