//! # probewire-rpc
//!
//! JSON-RPC 2.0 channel between a test driver and an instrumented
//! application.
//!
//! This crate provides the protocol half of probewire: the envelope codec, the
//! error taxonomy, a dispatcher that resolves dotted method names against
//! registered functions and a service object, three server bindings sharing
//! that dispatcher, and a client proxy with matching transports.
//!
//! ## Modules
//!
//! - [`error`] - Error codes and their classification
//! - [`protocol`] - Request/response envelope encoding and validation
//! - [`framing`] - 4-byte inclusive length-prefix framing codec
//! - [`dispatcher`] - Method resolution, argument binding and fault conversion
//! - [`transport`] - HTTP, stream and datagram server bindings
//! - [`client`] - Client proxy, call builder and client transports
//! - [`config`] - Timeouts and limits persisted in `~/.probewire/config.json`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use probewire_rpc::client::{HttpTransport, ServerProxy};
//! use probewire_rpc::config::RpcConfig;
//! use probewire_rpc::dispatcher::Dispatcher;
//! use probewire_rpc::transport::http::HttpServer;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register_function("add", |params| {
//!     let (a, b): (i64, i64) = params.bind(&["a", "b"])?;
//!     Ok(json!(a + b))
//! });
//!
//! let server = HttpServer::bind("127.0.0.1:0", Arc::new(dispatcher), &RpcConfig::default()).await?;
//! let uri = format!("http://{}/", server.local_addr());
//!
//! let mut proxy = ServerProxy::new(HttpTransport::new(&uri)?);
//! let sum: i64 = proxy.method("add").arg(2)?.arg(3)?.call_as().await?;
//! assert_eq!(sum, 5);
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod transport;
