//! Routes incoming datagrams to the overlay whose prefix they carry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use overlay_community::{CommunityError, Delivery, Overlay};
use overlay_core::wire::{MessageHeader, Prefix};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("overlay '{name}' shares its prefix with '{existing}'")]
    DuplicatePrefix { name: String, existing: String },
}

/// Owns every running overlay. One prefix, one overlay.
#[derive(Default)]
pub struct PrefixRouter {
    overlays: Vec<Box<dyn Overlay>>,
    /// prefix -> index into `overlays`.
    by_prefix: HashMap<Prefix, usize>,
}

impl PrefixRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, overlay: Box<dyn Overlay>) -> Result<usize, RouterError> {
        let prefix = overlay.prefix();
        if let Some(&i) = self.by_prefix.get(&prefix) {
            return Err(RouterError::DuplicatePrefix {
                name: overlay.name().to_string(),
                existing: self.overlays[i].name().to_string(),
            });
        }
        let index = self.overlays.len();
        self.overlays.push(overlay);
        self.by_prefix.insert(prefix, index);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Overlay + 'static)> {
        self.overlays.get_mut(index).map(|o| o.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Overlay> {
        self.overlays.iter().map(|o| o.as_ref())
    }

    /// Hand `data` to the matching overlay. `None` when no overlay owns the
    /// prefix (or the datagram is too short to carry one).
    pub fn route(&mut self, source: SocketAddr, data: &[u8], now: Instant) -> Option<Delivery> {
        let header = match MessageHeader::parse(data) {
            Ok(h) => h,
            Err(e) => {
                tracing::trace!(%source, len = data.len(), error = %e, "unroutable datagram");
                return None;
            }
        };
        let Some(&index) = self.by_prefix.get(&header.prefix()) else {
            tracing::trace!(%source, "no overlay for prefix");
            return None;
        };
        Some(self.overlays[index].deliver(source, data, now))
    }

    /// Start every overlay. Stops at the first failure.
    pub fn start_all(&mut self, now: Instant) -> Result<(), CommunityError> {
        for overlay in self.overlays.iter_mut() {
            overlay.start(now)?;
        }
        Ok(())
    }

    /// Run due tasks of every overlay. Returns how many ran in total.
    pub fn poll_all(&mut self, now: Instant) -> usize {
        self.overlays.iter_mut().map(|o| o.poll(now)).sum()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.overlays.iter().filter_map(|o| o.next_deadline()).min()
    }

    /// Unload the overlay owning `prefix` and stop routing to it. Indices of
    /// overlays registered after it shift down by one.
    pub fn unload(&mut self, prefix: &Prefix) -> bool {
        let Some(index) = self.by_prefix.remove(prefix) else {
            return false;
        };
        let mut overlay = self.overlays.remove(index);
        overlay.unload();
        for i in self.by_prefix.values_mut() {
            if *i > index {
                *i -= 1;
            }
        }
        tracing::info!(overlay = overlay.name(), "overlay removed from router");
        true
    }

    pub fn unload_all(&mut self) {
        for overlay in self.overlays.iter_mut() {
            overlay.unload();
        }
    }
}
