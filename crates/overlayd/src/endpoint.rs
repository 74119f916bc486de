//! UDP endpoint.
//!
//! One socket shared by every overlay. A receive task forwards datagrams
//! into a channel that the event loop drains; a send task drains the
//! outbound channel fed by [`UdpTransport`]. Nothing else touches the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use overlay_community::Transport;
use overlay_core::wire::MAX_DATAGRAM;

pub type Inbound = (SocketAddr, Bytes);
pub type Outbound = (SocketAddr, Bytes);

/// [`Transport`] backed by the endpoint's outbound channel.
pub struct UdpTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl UdpTransport {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }
}

impl Transport for UdpTransport {
    fn send(&self, to: SocketAddr, data: Bytes) {
        if self.tx.send((to, data)).is_err() {
            tracing::trace!(%to, "endpoint closed, datagram dropped");
        }
    }
}

/// Bind the shared UDP socket.
pub fn bind(address: &str, port: u16) -> Result<Arc<UdpSocket>> {
    let ip: std::net::IpAddr = address
        .parse()
        .with_context(|| format!("invalid bind address '{address}'"))?;
    let addr = SocketAddr::new(ip, port);

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind({addr})"))?;

    let socket =
        UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")?;
    Ok(Arc::new(socket))
}

/// Forward every received datagram into `inbound` until shutdown.
pub async fn recv_loop(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            r = socket.recv_from(&mut buf) => {
                let (len, source) = match r {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };
                tracing::trace!(%source, len, "datagram received");
                if inbound.send((source, Bytes::copy_from_slice(&buf[..len]))).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("receive loop stopped");
}

/// Send everything queued on `outbound` until shutdown.
pub async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            next = outbound.recv() => {
                let Some((to, data)) = next else { break };
                match socket.send_to(&data, to).await {
                    Ok(n) => tracing::trace!(%to, bytes = n, "datagram sent"),
                    Err(e) => tracing::warn!(%to, error = %e, "send_to failed"),
                }
            }
        }
    }
    tracing::debug!("send loop stopped");
}
