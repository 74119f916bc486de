//! overlay-community: the community engine with its peer table, task scheduler,
//! discovery walk, and the typed message routing every overlay shares.
//!
//! An application implements [`CommunityHooks`] and is wrapped in a
//! [`Community`]. Drivers (the daemon, test harnesses) talk to communities
//! through the object-safe [`Overlay`] trait.

pub mod community;
pub mod discovery;
pub mod lamport;
pub mod peer_table;
pub mod scheduler;
pub mod service;
pub mod transport;
pub mod walk;

pub use community::{
    Community, CommunityContext, CommunityError, CommunitySettings, CommunityState,
    CommunityStats, Delivery, Overlay, Route, TaskFn,
};
pub use peer_table::{PeerTable, Upsert};
pub use scheduler::{SchedulerError, TaskScheduler};
pub use service::CommunityHooks;
pub use transport::{Datagram, MemoryTransport, Transport};
pub use walk::{RandomChurn, RandomChurnConfig, RandomWalk, RandomWalkConfig, WalkStrategy};
