//! Configuration server.
//!
//! Serves the finalized VM configuration over HTTP/1.1 on the workspace's
//! ignition socket:
//!
//! | Route           | Response                       |
//! |-----------------|--------------------------------|
//! | `GET /vmconfig` | VM configuration as JSON       |
//! | `GET /healthz`  | `ok`                           |
//! | anything else   | 404                            |

use super::ConfigServer;
use crate::config::VmConfig;
use crate::error::{LinuxvmError, LinuxvmResult};
use crate::supervisor::CancelScope;
use crate::workspace::{Endpoint, SocketKind};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

pub struct IgnitionServer;

#[async_trait]
impl ConfigServer for IgnitionServer {
    async fn serve(&self, scope: CancelScope, config: Arc<VmConfig>) -> LinuxvmResult<()> {
        let endpoint = Endpoint::parse(&config.ignition_endpoint)
            .filter(|ep| ep.kind == SocketKind::Stream)
            .ok_or_else(|| {
                LinuxvmError::ConfigServer(format!(
                    "invalid ignition endpoint '{}'",
                    config.ignition_endpoint
                ))
            })?;

        let _ = std::fs::remove_file(&endpoint.path);
        let listener = UnixListener::bind(&endpoint.path).map_err(|e| {
            LinuxvmError::ConfigServer(format!("failed to bind {}: {}", endpoint, e))
        })?;

        let body = Bytes::from(serde_json::to_vec_pretty(&*config)?);
        tracing::info!(endpoint = %endpoint, "Configuration server listening");

        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        let result = loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = scope.cancelled() => break Ok(()),
            };

            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    break Err(LinuxvmError::ConfigServer(format!("accept failed: {}", e)));
                }
            };

            connections.retain(|conn| !conn.is_finished());

            let body = body.clone();
            let scope = scope.clone();
            connections.push(tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let body = body.clone();
                    async move { Ok::<_, Infallible>(route(&req, body)) }
                });
                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);

                tokio::select! {
                    served = conn => {
                        if let Err(e) = served {
                            tracing::debug!("Configuration connection error: {}", e);
                        }
                    }
                    _ = scope.cancelled() => {}
                }
            }));
        };

        for conn in connections {
            conn.abort();
            let _ = conn.await;
        }
        let _ = std::fs::remove_file(&endpoint.path);
        tracing::info!("Configuration server stopped");

        result
    }
}

fn route(req: &Request<Incoming>, vmconfig: Bytes) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/vmconfig") => {
            let mut resp = Response::new(Full::new(vmconfig));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        (&Method::GET, "/healthz") => Response::new(Full::new(Bytes::from_static(b"ok"))),
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }
}
