//! Client proxy and client-side transports.
//!
//! [`ServerProxy`] builds requests from a method path plus arguments, assigns
//! a fresh id, sends the payload through a [`Transport`] and decodes the
//! reply. A proxy issues one call at a time; run several proxies to call a
//! server concurrently.
//!
//! # Example
//!
//! ```no_run
//! use probewire_rpc::client::{ServerProxy, StreamTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut proxy = ServerProxy::new(StreamTransport::new("127.0.0.1:9800".parse()?));
//!
//! let sum: i64 = proxy.method("add").arg(2)?.arg(3)?.call_as().await?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, debug_span, trace, Instrument};
use uuid::Uuid;

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::framing::{decode_whole_frame, encode_frame, FrameCodec};
use crate::protocol::{decode_response, encode_request, Params, ProtocolError, Request};
use crate::transport::http::CONTENT_TYPE_JSON_RPC;
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a call can produce.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a structured error.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// The reply did not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The bytes could not be delivered or received.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No reply arrived in time. The server may still be working on it.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The result could not be converted into the requested type.
    #[error("unexpected result shape: {0}")]
    Decode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Moves one encoded request to the server and returns the encoded reply.
#[async_trait]
pub trait Transport: Send {
    async fn round_trip(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// A bidirectional async byte stream a [`StreamTransport`] can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// POSTs each request to a fixed URI.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    uri: Uri,
}

impl HttpTransport {
    /// Target an `http://host:port/path` URI.
    pub fn new(uri: &str) -> Result<Self, TransportError> {
        let uri: Uri = uri
            .parse()
            .map_err(|e| TransportError::Http(format!("invalid URI {uri:?}: {e}")))?;
        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            uri,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let request = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON_RPC)
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| TransportError::Http(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| TransportError::Http(format!("request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::Http(format!("server returned {status}")));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Http(format!("failed to read response: {e}")))?
            .to_bytes();
        Ok(body.to_vec())
    }
}

// ---------------------------------------------------------------------------
// StreamTransport
// ---------------------------------------------------------------------------

/// Persistent length-framed connection.
///
/// Connects lazily on the first call. The connection is dropped whenever a
/// round trip does not complete (I/O error, framing error, or the caller's
/// timeout cancelling it), so a late reply to an abandoned call is never read
/// as the answer to a later one.
pub struct StreamTransport {
    addr: Option<SocketAddr>,
    framed: Option<Framed<Box<dyn ByteStream>, FrameCodec>>,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl StreamTransport {
    /// Target a TCP address. No connection is made until the first call.
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_config(addr, &RpcConfig::default())
    }

    pub fn with_config(addr: SocketAddr, config: &RpcConfig) -> Self {
        Self {
            addr: Some(addr),
            framed: None,
            connect_timeout: config.connect_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Use an already connected stream. It cannot be re-established once
    /// dropped.
    pub fn from_stream(stream: impl ByteStream + 'static) -> Self {
        let config = RpcConfig::default();
        let stream: Box<dyn ByteStream> = Box::new(stream);
        Self {
            addr: None,
            framed: Some(Framed::new(
                stream,
                FrameCodec::with_max_frame_size(config.max_frame_size),
            )),
            connect_timeout: config.connect_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Returns `true` if the transport currently holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Close the connection, if one is active.
    pub fn disconnect(&mut self) {
        self.framed.take();
    }

    // Takes plain values so the round-trip future never holds `&self`
    // (the boxed stream is `Send` but not `Sync`).
    async fn connect(
        addr: Option<SocketAddr>,
        connect_timeout: Duration,
        max_frame_size: usize,
    ) -> Result<Framed<Box<dyn ByteStream>, FrameCodec>, TransportError> {
        let addr = addr
            .ok_or_else(|| TransportError::ConnectionFailed("connection lost and no address configured".into()))?;
        debug!(%addr, "connecting stream transport");
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionFailed(format!("connect to {addr} timed out")))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let stream: Box<dyn ByteStream> = Box::new(stream);
        Ok(Framed::new(stream, FrameCodec::with_max_frame_size(max_frame_size)))
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn round_trip(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        // Taken out for the duration of the exchange; only put back on success.
        let mut framed = match self.framed.take() {
            Some(framed) => framed,
            None => Self::connect(self.addr, self.connect_timeout, self.max_frame_size).await?,
        };

        trace!(payload_bytes = payload.len(), "writing frame");
        framed.send(payload).await?;
        let reply = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(TransportError::Closed),
        };
        trace!(payload_bytes = reply.len(), "read frame");

        self.framed = Some(framed);
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// DatagramTransport
// ---------------------------------------------------------------------------

/// One datagram out, one datagram in.
///
/// If a call is abandoned before its reply arrives (the caller's timeout
/// cancelling it), the socket is replaced on the next call so the late reply
/// is never read as the answer to a later request.
pub struct DatagramTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    in_flight: bool,
    max_datagram_size: usize,
}

impl DatagramTransport {
    /// Bind an ephemeral local socket and associate it with `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::connect_with_config(addr, &RpcConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: &RpcConfig) -> Result<Self, TransportError> {
        Ok(Self {
            socket: Self::bind_to(addr).await?,
            peer: addr,
            in_flight: false,
            max_datagram_size: config.max_datagram_size,
        })
    }

    /// Local address of the current socket.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    async fn bind_to(peer: SocketAddr) -> Result<UdpSocket, TransportError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Transport for DatagramTransport {
    async fn round_trip(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if self.in_flight {
            debug!(peer = %self.peer, "replacing datagram socket after an abandoned call");
            self.socket = Self::bind_to(self.peer).await?;
            self.in_flight = false;
        }

        self.in_flight = true;
        self.socket.send(&encode_frame(&payload)).await?;
        let mut buf = vec![0u8; self.max_datagram_size];
        let len = self.socket.recv(&mut buf).await?;
        self.in_flight = false;

        Ok(decode_whole_frame(&buf[..len])?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// ServerProxy
// ---------------------------------------------------------------------------

/// Calls methods on a remote dispatcher.
pub struct ServerProxy<T: Transport> {
    transport: T,
    call_timeout: Duration,
}

impl<T: Transport> ServerProxy<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &RpcConfig::default())
    }

    pub fn with_config(transport: T, config: &RpcConfig) -> Self {
        Self {
            transport,
            call_timeout: config.call_timeout(),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start building a call to the dotted `method` path.
    pub fn method(&mut self, method: impl Into<String>) -> CallBuilder<'_, T> {
        CallBuilder {
            proxy: self,
            method: method.into(),
            positional: Vec::new(),
            named: Map::new(),
        }
    }

    /// Call `method` with already assembled params.
    pub async fn call(&mut self, method: &str, params: Params) -> Result<Value, ClientError> {
        let id = Value::String(Uuid::new_v4().simple().to_string());
        let request = Request::new(id.clone(), method, params);
        let call_timeout = self.call_timeout;
        let span = debug_span!("rpc_call", method);
        async {
            let payload = encode_request(&request);
            let reply = timeout(call_timeout, self.transport.round_trip(payload))
                .await
                .map_err(|_| ClientError::Timeout(call_timeout))??;

            let response = decode_response(&reply)?;
            if response.id != id {
                // A server that could not read our id answers errors with null.
                let unattributed_error = response.id.is_null() && response.outcome.is_err();
                if !unattributed_error {
                    return Err(ProtocolError::IdMismatch {
                        expected: id,
                        actual: response.id,
                    }
                    .into());
                }
            }
            match response.outcome {
                Ok(result) => Ok(result),
                Err(error) => {
                    debug!(code = error.code, kind = error.kind().name(), "call failed");
                    Err(ClientError::Rpc(error))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// A call being assembled by [`ServerProxy::method`].
pub struct CallBuilder<'a, T: Transport> {
    proxy: &'a mut ServerProxy<T>,
    method: String,
    positional: Vec<Value>,
    named: Map<String, Value>,
}

impl<'a, T: Transport> CallBuilder<'a, T> {
    /// Append a positional argument.
    pub fn arg(mut self, value: impl Serialize) -> Result<Self, ClientError> {
        self.positional
            .push(serde_json::to_value(value).map_err(ClientError::Decode)?);
        Ok(self)
    }

    /// Set a named argument.
    pub fn named(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self, ClientError> {
        self.named
            .insert(name.into(), serde_json::to_value(value).map_err(ClientError::Decode)?);
        Ok(self)
    }

    /// Send the call and return the raw result.
    pub async fn call(self) -> Result<Value, ClientError> {
        let params = match (self.positional.is_empty(), self.named.is_empty()) {
            (true, true) => Params::None,
            (false, true) => Params::Positional(self.positional),
            (true, false) => Params::Named(self.named),
            (false, false) => return Err(ProtocolError::MixedParams.into()),
        };
        self.proxy.call(&self.method, params).await
    }

    /// Send the call and deserialize the result into `R`.
    pub async fn call_as<R: DeserializeOwned>(self) -> Result<R, ClientError> {
        let value = self.call().await?;
        serde_json::from_value(value).map_err(ClientError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
