//! Shared test helpers for probewire-rpc integration tests.
//!
//! Servers are bound to `127.0.0.1:0` and torn down through their handles.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use probewire_rpc::client::{DatagramTransport, HttpTransport, ServerProxy, StreamTransport};
use probewire_rpc::config::RpcConfig;
use probewire_rpc::dispatcher::{Dispatcher, HandlerResult, Member, RpcService};
use probewire_rpc::error::RpcError;
use probewire_rpc::protocol::Params;
use probewire_rpc::transport::datagram::DatagramServer;
use probewire_rpc::transport::http::HttpServer;
use probewire_rpc::transport::stream::StreamServer;
use probewire_rpc::transport::ServerHandle;

// ---------------------------------------------------------------------------
// Sample service
// ---------------------------------------------------------------------------

/// `math.mul(a, b)` lives on a nested service.
pub struct MathService;

#[async_trait]
impl RpcService for MathService {
    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "mul" => Some(Member::Method),
            _ => None,
        }
    }

    async fn call(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            "mul" => {
                let (a, b): (i64, i64) = params.bind(&["a", "b"])?;
                Ok(json!(a * b))
            }
            _ => Err(RpcError::method_not_found(method).into()),
        }
    }
}

/// Root service: `slow_echo(value, delay_ms)` plus the nested `math`.
pub struct SampleService {
    math: MathService,
}

#[async_trait]
impl RpcService for SampleService {
    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "slow_echo" => Some(Member::Method),
            "math" => Some(Member::Nested(&self.math)),
            _ => None,
        }
    }

    async fn call(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            "slow_echo" => {
                let (value, delay_ms): (Value, u64) = params.bind(&["value", "delay_ms"])?;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value)
            }
            _ => Err(RpcError::method_not_found(method).into()),
        }
    }
}

/// Dispatcher with `add(a, b)` registered as a function and [`SampleService`].
pub fn sample_dispatcher() -> Arc<Dispatcher> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register_function("add", |params| {
        let (a, b): (i64, i64) = params.bind(&["a", "b"])?;
        Ok(json!(a + b))
    });
    dispatcher.register_service(SampleService { math: MathService });
    Arc::new(dispatcher)
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

pub struct Servers {
    pub http: ServerHandle,
    pub stream: ServerHandle,
    pub datagram: ServerHandle,
}

impl Servers {
    pub async fn stop(self) {
        self.http.stop().await;
        self.stream.stop().await;
        self.datagram.stop().await;
    }
}

/// Route library logs to the test writer. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Start all three bindings over one dispatcher.
pub async fn spawn_servers(dispatcher: Arc<Dispatcher>) -> Servers {
    init_tracing();
    let config = RpcConfig::default();
    Servers {
        http: HttpServer::bind("127.0.0.1:0", dispatcher.clone(), &config).await.unwrap(),
        stream: StreamServer::bind("127.0.0.1:0", dispatcher.clone(), &config).await.unwrap(),
        datagram: DatagramServer::bind("127.0.0.1:0", dispatcher, &config).await.unwrap(),
    }
}

pub fn http_proxy(addr: SocketAddr) -> ServerProxy<HttpTransport> {
    ServerProxy::new(HttpTransport::new(&format!("http://{addr}/json")).unwrap())
}

pub fn stream_proxy(addr: SocketAddr) -> ServerProxy<StreamTransport> {
    ServerProxy::new(StreamTransport::new(addr))
}

pub async fn datagram_proxy(addr: SocketAddr) -> ServerProxy<DatagramTransport> {
    ServerProxy::new(DatagramTransport::connect(addr).await.unwrap())
}

// ---------------------------------------------------------------------------
// Raw HTTP
// ---------------------------------------------------------------------------

/// Send a raw HTTP/1.1 request and return the whole reply as text.
///
/// The request should ask for `Connection: close` so the read terminates.
pub async fn raw_http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}

/// Status code from the first line of a raw reply.
pub fn status_of(reply: &str) -> u16 {
    reply
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("no status line in {reply:?}"))
}

/// Body of a raw reply.
pub fn body_of(reply: &str) -> &str {
    reply.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}
