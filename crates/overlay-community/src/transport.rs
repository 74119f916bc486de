//! Transport seam: the only thing a community needs from the network.
//!
//! Sending is fire-and-forget. Receiving is the caller's job: whoever owns
//! the socket hands datagrams to `Overlay::deliver` on the scheduling thread.

use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;

/// Best-effort datagram sender.
pub trait Transport: Send + Sync {
    /// Queue `data` for `to`. Never blocks, never reports failure.
    fn send(&self, to: SocketAddr, data: Bytes);
}

/// One datagram captured by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Bytes,
}

/// Transport that keeps outgoing datagrams in memory.
///
/// Used by tests and simulations: a harness drains the outbox and delivers
/// each datagram to whichever community owns `to`.
pub struct MemoryTransport {
    local: SocketAddr,
    outbox: Mutex<Vec<Datagram>>,
}

impl MemoryTransport {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            local,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Take everything sent so far, oldest first.
    pub fn drain(&self) -> Vec<Datagram> {
        let mut outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *outbox)
    }

    pub fn pending(&self) -> usize {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, to: SocketAddr, data: Bytes) {
        let mut outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        outbox.push(Datagram {
            from: self.local,
            to,
            data,
        });
    }
}
