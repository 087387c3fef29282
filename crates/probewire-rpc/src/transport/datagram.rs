//! Connectionless datagram binding.
//!
//! One datagram carries one complete length-prefixed message; nothing is
//! reassembled across datagrams. Packets are handled one at a time as they
//! arrive and the reply goes back to the sending address. A datagram whose
//! prefix does not describe exactly its own length is dropped without reply.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{bind_error, ServerHandle, TransportError};
use crate::config::RpcConfig;
use crate::dispatcher::Dispatcher;
use crate::framing::{decode_whole_frame, encode_frame};

/// Datagram server over UDP.
pub struct DatagramServer;

impl DatagramServer {
    /// Bind `addr` and start serving.
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        config: &RpcConfig,
    ) -> Result<ServerHandle, TransportError> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "datagram server listening");

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let max_datagram_size = config.max_datagram_size;

        let join_handle = tokio::spawn(async move {
            Self::recv_loop(socket, dispatcher, max_datagram_size, token).await;
        });

        Ok(ServerHandle::new(local_addr, cancel_token, join_handle))
    }

    async fn recv_loop(
        socket: UdpSocket,
        dispatcher: Arc<Dispatcher>,
        max_datagram_size: usize,
        cancel_token: CancellationToken,
    ) {
        let mut buf = vec![0u8; max_datagram_size];
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        Self::handle_datagram(&socket, &dispatcher, &buf[..len], peer).await;
                    }
                    Err(e) => warn!(error = %e, "datagram receive failed"),
                },
            }
        }
        debug!("datagram server stopped");
    }

    async fn handle_datagram(
        socket: &UdpSocket,
        dispatcher: &Arc<Dispatcher>,
        data: &[u8],
        peer: SocketAddr,
    ) {
        let payload = match decode_whole_frame(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed datagram");
                return;
            }
        };
        trace!(%peer, payload_bytes = payload.len(), "datagram received");

        let reply = encode_frame(&dispatcher.marshaled_dispatch(payload).await);
        if let Err(e) = socket.send_to(&reply, peer).await {
            warn!(%peer, error = %e, "datagram reply failed");
        }
    }
}
