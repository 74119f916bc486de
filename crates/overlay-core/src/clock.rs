//! Global time: a Lamport counter per community instance.
//!
//! Every outgoing message claims a fresh value. Every verified incoming
//! message pulls the counter past the sender's value. The counter never
//! decreases and never wraps: it saturates at `u64::MAX`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalClock {
    value: u64,
}

impl GlobalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known value, e.g. one persisted by the application.
    pub fn starting_at(value: u64) -> Self {
        Self { value }
    }

    /// The last value claimed or synced.
    pub fn current(&self) -> u64 {
        self.value
    }

    /// Advance for an outgoing message and return the value to stamp on it.
    pub fn claim(&mut self) -> u64 {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Account for a verified message stamped with `received`.
    ///
    /// `local = max(local, received) + 1`
    pub fn sync(&mut self, received: u64) -> u64 {
        self.value = self.value.max(received).saturating_add(1);
        self.value
    }
}
