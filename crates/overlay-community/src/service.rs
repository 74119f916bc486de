//! Hooks trait for community applications.
//!
//! The engine owns the socket-facing side of a community: prefix matching,
//! authentication, the peer table, discovery and the task scheduler. An
//! application plugs in through this trait and is handed a
//! [`CommunityContext`] whenever it runs.

use crate::community::{CommunityContext, Route};

/// What an application brings to a [`crate::Community`].
///
/// Intentionally small. Everything an application can *do* lives on the
/// context; this trait only says what it *handles*.
pub trait CommunityHooks: Send + Sized + 'static {
    /// Message handlers, read once at construction.
    ///
    /// Ids must be unique and must not collide with the discovery messages.
    fn handlers(&self) -> Vec<Route<Self>>;

    /// Called by `start` after the walk task is registered. Register
    /// periodic work here. An error aborts the start.
    fn started(&mut self, ctx: &mut CommunityContext<Self>) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Run a named action requested from outside, e.g. a configured start
    /// action. Returns `Ok(false)` for names this application does not know.
    fn perform(&mut self, action: &str, ctx: &mut CommunityContext<Self>) -> anyhow::Result<bool> {
        let _ = (action, ctx);
        Ok(false)
    }

    /// Called by `unload` before tasks are cancelled and peers dropped.
    fn unloading(&mut self, ctx: &mut CommunityContext<Self>) {
        let _ = ctx;
    }
}
