//! Persistent stream binding.
//!
//! Every accepted connection gets its own task that reads length-prefixed
//! frames through [`FrameCodec`], dispatches each one and writes the framed
//! reply before reading the next. A framing error or I/O error ends that
//! connection only.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{bind_error, ServerHandle, TransportError};
use crate::config::RpcConfig;
use crate::dispatcher::Dispatcher;
use crate::framing::{FrameCodec, FrameError};

/// Stream server over TCP.
pub struct StreamServer;

impl StreamServer {
    /// Bind `addr` and start serving.
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        config: &RpcConfig,
    ) -> Result<ServerHandle, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "stream server listening");

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let max_frame_size = config.max_frame_size;

        let join_handle = tokio::spawn(async move {
            Self::accept_loop(listener, dispatcher, max_frame_size, token).await;
        });

        Ok(ServerHandle::new(local_addr, cancel_token, join_handle))
    }

    async fn accept_loop(
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        max_frame_size: usize,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "stream accept failed");
                            continue;
                        }
                    };
                    let dispatcher = dispatcher.clone();
                    let token = cancel_token.child_token();
                    tokio::spawn(async move {
                        Self::run_connection(socket, peer, dispatcher, max_frame_size, token).await;
                    });
                }
            }
        }
        debug!("stream server stopped");
    }

    async fn run_connection<S>(
        io: S,
        peer: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        max_frame_size: usize,
        cancel_token: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(%peer, "stream connection opened");
        match Self::serve_io(io, dispatcher, max_frame_size, cancel_token).await {
            Ok(()) => debug!(%peer, "stream connection closed"),
            Err(e) => warn!(%peer, error = %e, "stream connection dropped"),
        }
    }

    /// Serve frames on an already connected byte stream until it closes.
    ///
    /// Returns `Ok(())` on a clean close or cancellation. A close in the
    /// middle of a frame is reported as an I/O error.
    pub async fn serve_io<S>(
        io: S,
        dispatcher: Arc<Dispatcher>,
        max_frame_size: usize,
        cancel_token: CancellationToken,
    ) -> Result<(), FrameError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, FrameCodec::with_max_frame_size(max_frame_size));
        loop {
            let next = tokio::select! {
                _ = cancel_token.cancelled() => return Ok(()),
                next = framed.next() => next,
            };
            let Some(frame) = next else {
                return Ok(());
            };
            let payload = frame?;
            trace!(payload_bytes = payload.len(), "stream frame received");

            let reply = dispatcher.marshaled_dispatch(&payload).await;
            trace!(payload_bytes = reply.len(), "stream frame sent");
            framed.send(reply).await?;
        }
    }
}
