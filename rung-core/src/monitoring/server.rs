//! HTTP exporter for Prometheus scraping
//!
//! Serves `/metrics` (text encoding of the registry) and `/healthz`. Spawn
//! [`serve_metrics`] on the runtime next to the orchestrator.

use crate::monitoring::MetricsRegistry;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".parse().expect("default metrics addr"),
        }
    }
}

/// Run the exporter until the task is cancelled
pub async fn serve_metrics(config: MetricsServerConfig, metrics: MetricsRegistry) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind metrics listener")?;
    info!("metrics listening on http://{}/metrics", config.listen_addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("metrics accept failed: {e}");
                continue;
            }
        };
        debug!(%peer, "metrics connection");
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle(req, metrics.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("metrics connection error: {e}");
            }
        });
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    metrics: MetricsRegistry,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let families = metrics.registry().gather();
            let mut buf = Vec::new();
            if encoder.encode(&families, &mut buf).is_err() {
                return Ok(status(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
            }
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", encoder.format_type())
                .body(Full::new(Bytes::from(buf)))
                .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR, "build error"))
        }
        "/healthz" => status(StatusCode::OK, "ok"),
        _ => status(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn status(code: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .expect("static response")
}
