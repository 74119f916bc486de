//! Peer identity: who a remote participant is and where we last saw them.

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::Instant;

use crate::crypto;
use crate::wire::{PUBLIC_KEY_LEN, UNKNOWN_ADDRESS};

/// A remote (or the local) participant.
///
/// Identity is the public key. The address is only the best known route and
/// changes whenever a verified message arrives from somewhere new; two
/// `Peer`s with the same key are equal regardless of address.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Ed25519 public key. Immutable.
    public_key: [u8; PUBLIC_KEY_LEN],

    /// Best known address. `0.0.0.0:0` until the first contact.
    pub address: SocketAddr,

    /// Last verified contact. Walk strategies use this for liveness.
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(public_key: [u8; PUBLIC_KEY_LEN], address: SocketAddr, now: Instant) -> Self {
        Self {
            public_key,
            address,
            last_seen: now,
        }
    }

    /// A peer with no observed address yet.
    pub fn unaddressed(public_key: [u8; PUBLIC_KEY_LEN], now: Instant) -> Self {
        Self::new(public_key, UNKNOWN_ADDRESS, now)
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    pub fn mid(&self) -> [u8; 32] {
        crypto::mid(&self.public_key)
    }

    /// Short hex tag for logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.mid()[..8])
    }

    pub fn has_address(&self) -> bool {
        self.address != UNKNOWN_ADDRESS
    }

    /// Record a verified contact. Returns true if the address changed.
    pub fn touch(&mut self, address: SocketAddr, now: Instant) -> bool {
        self.last_seen = now;
        if self.address != address {
            self.address = address;
            true
        } else {
            false
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.public_key.hash(state);
    }
}
