//! Peer table: the verified peers a community currently knows.
//!
//! Keyed on public key. Ordered (BTreeMap) so that iteration, and therefore
//! seeded walks, are reproducible. The table never evicts on its own; walk
//! strategies decide who leaves.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use overlay_core::wire::PUBLIC_KEY_LEN;
use overlay_core::Peer;
use rand::seq::IteratorRandom;
use rand::Rng;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First verified contact with this key.
    Inserted,
    /// Known key, same address. `last_seen` refreshed.
    Refreshed,
    /// Known key, new address.
    Moved { from: SocketAddr },
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<[u8; PUBLIC_KEY_LEN], Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record verified contact from `public_key` at `address`.
    ///
    /// An address belongs to one key at a time: a different key already
    /// sitting on `address` is stale (the remote restarted with a new
    /// identity) and is dropped.
    pub fn upsert(
        &mut self,
        public_key: [u8; PUBLIC_KEY_LEN],
        address: SocketAddr,
        now: Instant,
    ) -> Upsert {
        let stale: Vec<_> = self
            .peers
            .iter()
            .filter(|(key, peer)| {
                **key != public_key && peer.address == address && peer.has_address()
            })
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            self.peers.remove(&key);
        }

        match self.peers.get_mut(&public_key) {
            Some(peer) => {
                let from = peer.address;
                if peer.touch(address, now) {
                    Upsert::Moved { from }
                } else {
                    Upsert::Refreshed
                }
            }
            None => {
                self.peers.insert(public_key, Peer::new(public_key, address, now));
                Upsert::Inserted
            }
        }
    }

    pub fn remove(&mut self, public_key: &[u8; PUBLIC_KEY_LEN]) -> Option<Peer> {
        self.peers.remove(public_key)
    }

    pub fn remove_by_address(&mut self, address: SocketAddr) -> Option<Peer> {
        let key = *self.get_by_address(address)?.public_key();
        self.peers.remove(&key)
    }

    pub fn get(&self, public_key: &[u8; PUBLIC_KEY_LEN]) -> Option<&Peer> {
        self.peers.get(public_key)
    }

    pub fn get_by_address(&self, address: SocketAddr) -> Option<&Peer> {
        self.peers.values().find(|p| p.address == address)
    }

    pub fn contains_address(&self, address: SocketAddr) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Addresses of every peer with a known address, in key order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.peers
            .values()
            .filter(|p| p.has_address())
            .map(|p| p.address)
            .collect()
    }

    /// Up to `n` distinct peers, chosen uniformly.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<&Peer> {
        self.peers.values().choose_multiple(rng, n)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
