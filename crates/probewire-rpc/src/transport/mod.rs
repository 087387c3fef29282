//! Server bindings that carry payloads between peers and a [`Dispatcher`].
//!
//! Each binding binds a socket, spawns its accept/receive loop on the tokio
//! runtime and hands back a [`ServerHandle`]. All three share the
//! dispatcher's `marshaled_dispatch` contract and differ only in framing:
//!
//! | Binding               | Framing                                   | Scheduling             |
//! |-----------------------|-------------------------------------------|------------------------|
//! | [`http::HttpServer`]  | one `POST` body per exchange              | task per connection    |
//! | [`stream::StreamServer`] | 4-byte BE inclusive length prefix      | task per connection    |
//! | [`datagram::DatagramServer`] | one prefixed message per datagram  | inline, per packet     |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use probewire_rpc::config::RpcConfig;
//! use probewire_rpc::dispatcher::Dispatcher;
//! use probewire_rpc::transport::stream::StreamServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Arc::new(Dispatcher::new());
//! let handle = StreamServer::bind("127.0.0.1:0", dispatcher, &RpcConfig::default()).await?;
//! println!("serving on {}", handle.local_addr());
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher

pub mod datagram;
pub mod http;
pub mod stream;

use std::net::SocketAddr;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::framing::FrameError;

/// Errors raised by server and client transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish a connection to a server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An I/O error occurred on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes on the wire violated the length-prefix framing.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The HTTP exchange failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The peer closed the connection before replying.
    #[error("connection closed by peer")]
    Closed,
}

/// Handle for controlling a running server.
///
/// The server keeps running until [`stop`](Self::stop) or
/// [`cancel`](Self::cancel) is called. Dropping the handle does not stop it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub(crate) fn new(
        local_addr: SocketAddr,
        cancel_token: CancellationToken,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            cancel_token,
            join_handle,
        }
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the server and waits for its loop to finish.
    ///
    /// Connections already being served are told to stop as well.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        let _ = self.join_handle.await;
    }

    /// Cancels the server without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Returns whether the server loop is still running.
    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

pub(crate) fn bind_error(addr: &str, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        addr: addr.to_string(),
        source,
    }
}
