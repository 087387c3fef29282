//! HTTP request/response binding.
//!
//! Serves HTTP/1.1 with hyper. Each connection runs on its own task and is
//! served one request at a time. Only `POST` to an allowed path with an
//! identity-encoded, length-delimited body reaches the dispatcher:
//!
//! | Condition                                  | Status |
//! |--------------------------------------------|--------|
//! | method is not `POST`                        | 501    |
//! | path not in [`RpcConfig::rpc_paths`]        | 404 (`No such page`) |
//! | `Content-Encoding` other than `identity`    | 501    |
//! | `Transfer-Encoding` present                 | 501    |
//! | `Content-Length` missing or unparsable      | 411    |
//! | `Content-Length` above `max_body_size`      | 413    |
//! | body could not be read                      | 500    |
//! | otherwise                                   | 200 with the encoded response |

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{bind_error, ServerHandle, TransportError};
use crate::config::RpcConfig;
use crate::dispatcher::Dispatcher;

/// Content type of request and response bodies.
pub const CONTENT_TYPE_JSON_RPC: &str = "application/json-rpc";

/// HTTP server in front of a dispatcher.
pub struct HttpServer;

impl HttpServer {
    /// Bind `addr` and start serving.
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        config: &RpcConfig,
    ) -> Result<ServerHandle, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "HTTP server listening");

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let config = Arc::new(config.clone());

        let join_handle = tokio::spawn(async move {
            Self::accept_loop(listener, dispatcher, config, token).await;
        });

        Ok(ServerHandle::new(local_addr, cancel_token, join_handle))
    }

    async fn accept_loop(
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        config: Arc<RpcConfig>,
        cancel_token: CancellationToken,
    ) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "HTTP accept failed");
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let dispatcher = dispatcher.clone();
            let config = config.clone();
            let token = cancel_token.child_token();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let dispatcher = dispatcher.clone();
                    let config = config.clone();
                    async move { Ok::<_, Infallible>(Self::handle_request(req, dispatcher, config).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = conn => {
                        if let Err(err) = result {
                            debug!(%peer, error = %err, "HTTP connection ended with error");
                        }
                    }
                }
            });
        }
        debug!("HTTP server stopped");
    }

    async fn handle_request(
        req: Request<Incoming>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<RpcConfig>,
    ) -> Response<Full<Bytes>> {
        if req.method() != Method::POST {
            return empty_response(StatusCode::NOT_IMPLEMENTED);
        }
        if !config.accepts_path(req.uri().path()) {
            debug!(path = req.uri().path(), "rejecting unknown path");
            return not_found();
        }

        let headers = req.headers();
        if let Some(encoding) = headers.get(CONTENT_ENCODING) {
            let identity = encoding
                .to_str()
                .map(|e| e.trim().eq_ignore_ascii_case("identity"))
                .unwrap_or(false);
            if !identity {
                return empty_response(StatusCode::NOT_IMPLEMENTED);
            }
        }
        if headers.contains_key(TRANSFER_ENCODING) {
            return empty_response(StatusCode::NOT_IMPLEMENTED);
        }
        let Some(declared) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
        else {
            return empty_response(StatusCode::LENGTH_REQUIRED);
        };
        if declared > config.max_body_size {
            return empty_response(StatusCode::PAYLOAD_TOO_LARGE);
        }

        let body = match read_body(req.into_body(), declared, config.max_chunk_size).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read HTTP request body");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        trace!(payload_bytes = body.len(), "HTTP request body read");

        let reply = dispatcher.marshaled_dispatch(&body).await;
        let len = reply.len();
        let mut response = Response::new(Full::new(Bytes::from(reply)));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON_RPC));
        response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }
}

/// Failure reading a request body.
#[derive(Error, Debug)]
enum BodyError {
    #[error("body read failed: {0}")]
    Read(String),

    #[error("body ended after {received} of {declared} declared bytes")]
    Truncated { declared: usize, received: usize },

    #[error("body exceeds its declared length of {declared} bytes")]
    Overrun { declared: usize },
}

/// Read exactly `declared` bytes of body.
///
/// Each incoming frame is copied in slices of at most `max_chunk_size`, and
/// the buffer only grows by one slice at a time, so a large declared length
/// never reserves memory ahead of the bytes actually arriving.
async fn read_body<B>(mut body: B, declared: usize, max_chunk_size: usize) -> Result<Vec<u8>, BodyError>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    let chunk = max_chunk_size.max(1);
    let mut buf = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| BodyError::Read(e.to_string()))?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        for slice in data.chunks(chunk) {
            if buf.len() + slice.len() > declared {
                return Err(BodyError::Overrun { declared });
            }
            buf.reserve_exact(slice.len());
            buf.extend_from_slice(slice);
        }
    }
    if buf.len() != declared {
        return Err(BodyError::Truncated {
            declared,
            received: buf.len(),
        });
    }
    Ok(buf)
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(0usize));
    response
}

fn not_found() -> Response<Full<Bytes>> {
    const BODY: &str = "No such page";
    let mut response = Response::new(Full::new(Bytes::from_static(BODY.as_bytes())));
    *response.status_mut() = StatusCode::NOT_FOUND;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(BODY.len()));
    response
}
