//! Community engine.
//!
//! A [`Community`] is one overlay instance: an application's hooks plus the
//! machinery every overlay shares. Incoming datagrams go through
//! [`Overlay::deliver`]: prefix check, route lookup by message id, signature
//! verification, clock sync, peer upsert, and finally the typed handler.
//! Periodic work (the discovery walk and anything the application
//! registers) runs from [`Overlay::poll`].
//!
//! Everything happens on the caller's thread. Time is passed in explicitly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use overlay_core::crypto::Keypair;
use overlay_core::message::{pack_auth, peek_message_id, unpack_auth};
use overlay_core::payload::validate_schema;
use overlay_core::wire::{
    Prefix, ServiceId, MAX_DATAGRAM, PUBLIC_KEY_LEN, RESERVED_MESSAGE_IDS, UNKNOWN_ADDRESS,
    WALK_INTERVAL_MS,
};
use overlay_core::{FieldCode, FormatError, GlobalClock, Payload, Peer, UnpackError, Unpacked};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::discovery;
use crate::peer_table::{PeerTable, Upsert};
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::service::CommunityHooks;
use crate::transport::Transport;
use crate::walk::WalkStrategy;

/// Name of the task that drives the walk strategy.
pub const WALK_TASK: &str = "discovery:walk";

// ── State and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityState {
    Constructed,
    Started,
    Running,
    Unloading,
    Unloaded,
}

/// What happened to one delivered datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Verified and handled.
    Dispatched { message_id: u8 },
    /// Verified, but the handler returned an error.
    HandlerFailed { message_id: u8 },
    /// Too short to carry a prefix, or someone else's prefix.
    ForeignPrefix,
    /// Our prefix, no handler for the id.
    UnknownMessage { message_id: u8 },
    /// Our prefix, but the payloads do not decode.
    Malformed { message_id: u8 },
    /// Our prefix, but the signature does not verify.
    Unauthenticated { message_id: u8 },
    /// The community is not running.
    NotRunning,
}

impl Delivery {
    /// Did the datagram reach an application handler?
    pub fn reached_handler(&self) -> bool {
        matches!(self, Self::Dispatched { .. } | Self::HandlerFailed { .. })
    }
}

#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("message id {0} is registered twice")]
    DuplicateMessageId(u8),

    #[error("message id {0} is reserved for discovery")]
    ReservedMessageId(u8),

    #[error("message id {message_id} has an invalid format: {source}")]
    InvalidFormat {
        message_id: u8,
        #[source]
        source: FormatError,
    },

    #[error("cannot {action} a community that is {state:?}")]
    InvalidState {
        action: &'static str,
        state: CommunityState,
    },

    #[error("start hook failed: {0}")]
    StartFailed(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Traffic counters, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommunityStats {
    pub sent: u64,
    pub bytes_sent: u64,
    /// Datagrams that passed verification.
    pub received: u64,
    /// Datagrams with our prefix that were rejected.
    pub dropped: u64,
    pub handler_errors: u64,
}

// ── Routes ───────────────────────────────────────────────────────────────────

enum RouteError {
    Unpack(UnpackError),
    Handler(anyhow::Error),
}

type Dispatch<H> = Box<
    dyn Fn(&mut H, &mut CommunityContext<H>, SocketAddr, &[u8]) -> Result<(), RouteError> + Send,
>;

/// One entry of a community's decode map: a message id, the body format,
/// and a typed handler.
///
/// The handler only ever sees verified messages. It receives the source
/// address and the decoded auth, global-time and body payloads.
pub struct Route<H> {
    message_id: u8,
    name: &'static str,
    format: &'static [FieldCode],
    dispatch: Dispatch<H>,
}

impl<H: 'static> Route<H> {
    pub fn new<P, F>(message_id: u8, name: &'static str, handler: F) -> Self
    where
        P: Payload + 'static,
        F: Fn(&mut H, &mut CommunityContext<H>, SocketAddr, Unpacked<P>) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        let dispatch: Dispatch<H> = Box::new(
            move |app: &mut H, ctx: &mut CommunityContext<H>, source: SocketAddr, raw: &[u8]| {
                let message = unpack_auth::<P>(&ctx.prefix, raw).map_err(RouteError::Unpack)?;
                ctx.accept(source, &message.auth.public_key, message.dist.global_time);
                handler(app, ctx, source, message).map_err(RouteError::Handler)
            },
        );
        Self {
            message_id,
            name,
            format: P::FORMAT,
            dispatch,
        }
    }

    pub fn message_id(&self) -> u8 {
        self.message_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<H> std::fmt::Debug for Route<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("message_id", &self.message_id)
            .field("name", &self.name)
            .field("format", &self.format)
            .finish()
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// Per-instance parameters that are not part of the application.
pub struct CommunitySettings {
    pub name: String,
    pub service_id: ServiceId,
    /// Walk strategies, each stepped on every walk tick.
    pub walks: Vec<Box<dyn WalkStrategy>>,
    pub walk_interval: Duration,
    /// Seed for the community's own RNG (introduction choices and request
    /// identifiers). `None` = from entropy.
    pub seed: Option<u64>,
}

impl CommunitySettings {
    pub fn new(name: impl Into<String>, service_id: ServiceId) -> Self {
        Self {
            name: name.into(),
            service_id,
            walks: Vec::new(),
            walk_interval: Duration::from_millis(WALK_INTERVAL_MS),
            seed: None,
        }
    }

    pub fn with_walk(mut self, walk: impl WalkStrategy + 'static) -> Self {
        self.walks.push(Box::new(walk));
        self
    }

    pub fn with_boxed_walk(mut self, walk: Box<dyn WalkStrategy>) -> Self {
        self.walks.push(walk);
        self
    }

    pub fn with_walk_interval(mut self, interval: Duration) -> Self {
        self.walk_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// A scheduled callback. Runs with the application and its context.
pub type TaskFn<H> = Box<dyn FnMut(&mut H, &mut CommunityContext<H>) -> anyhow::Result<()> + Send>;

/// Everything of a community except the application itself. Handed to
/// handlers and tasks so they can send, inspect peers and schedule work.
pub struct CommunityContext<H> {
    pub(crate) name: String,
    pub(crate) keypair: Arc<Keypair>,
    pub(crate) prefix: Prefix,
    pub(crate) clock: GlobalClock,
    pub(crate) peers: PeerTable,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tasks: TaskScheduler<TaskFn<H>>,
    pub(crate) walks: Vec<Box<dyn WalkStrategy>>,
    /// Our address as last reported by a peer.
    pub(crate) external: Option<SocketAddr>,
    pub(crate) rng: StdRng,
    pub(crate) now: Instant,
    pub(crate) stats: CommunityStats,
}

impl<H> CommunityContext<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.keypair.public
    }

    /// Time of the event currently being processed.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn global_time(&self) -> u64 {
        self.clock.current()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerTable {
        &mut self.peers
    }

    pub fn external_address(&self) -> Option<SocketAddr> {
        self.external
    }

    /// Ourselves as others see us: our key and the last externally observed
    /// address (unknown until a peer has told us).
    pub fn my_peer(&self) -> Peer {
        Peer::new(
            self.keypair.public,
            self.external.unwrap_or(UNKNOWN_ADDRESS),
            self.now,
        )
    }

    pub fn stats(&self) -> &CommunityStats {
        &self.stats
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Sign and send `body` to `to`, claiming a new global time.
    ///
    /// Nothing is claimed when the message cannot go out: the unknown
    /// address is skipped and an oversized message is an error.
    pub fn send<P: Payload>(
        &mut self,
        to: SocketAddr,
        message_id: u8,
        body: &P,
    ) -> Result<(), FormatError> {
        if to == UNKNOWN_ADDRESS {
            trace!(community = %self.name, "not sending to unknown address");
            return Ok(());
        }
        let raw = self.sign(message_id, body)?;
        self.transmit(to, raw);
        Ok(())
    }

    pub fn send_to_peer<P: Payload>(
        &mut self,
        peer: &Peer,
        message_id: u8,
        body: &P,
    ) -> Result<(), FormatError> {
        self.send(peer.address, message_id, body)
    }

    /// Send the same signed message to every addressed peer. Returns the
    /// number of recipients.
    pub fn broadcast<P: Payload>(
        &mut self,
        message_id: u8,
        body: &P,
    ) -> Result<usize, FormatError> {
        let targets = self.peers.addresses();
        if targets.is_empty() {
            return Ok(0);
        }
        let raw = self.sign(message_id, body)?;
        for to in &targets {
            self.transmit(*to, raw.clone());
        }
        Ok(targets.len())
    }

    /// Pack with the next global time and claim it once the result fits.
    fn sign<P: Payload>(&mut self, message_id: u8, body: &P) -> Result<Bytes, FormatError> {
        let global_time = self.clock.current().saturating_add(1);
        let raw = pack_auth(&self.keypair, &self.prefix, message_id, global_time, body)?;
        if raw.len() > MAX_DATAGRAM {
            warn!(community = %self.name, len = raw.len(), "datagram too large, not sent");
            return Err(FormatError::Oversize {
                len: raw.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.clock.claim();
        Ok(Bytes::from(raw))
    }

    fn transmit(&mut self, to: SocketAddr, data: Bytes) {
        self.stats.sent += 1;
        self.stats.bytes_sent += data.len() as u64;
        trace!(community = %self.name, %to, len = data.len(), "send");
        self.transport.send(to, data);
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    /// Run `task` every `interval`, first at `now` if `run_immediately`.
    pub fn register_periodic<F>(
        &mut self,
        name: &str,
        interval: Duration,
        run_immediately: bool,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnMut(&mut H, &mut CommunityContext<H>) -> anyhow::Result<()> + Send + 'static,
    {
        let now = self.now;
        self.tasks
            .register_periodic(name, interval, run_immediately, now, Box::new(task))
    }

    /// Run `task` once after `delay`.
    pub fn register_delayed<F>(
        &mut self,
        name: &str,
        delay: Duration,
        task: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnMut(&mut H, &mut CommunityContext<H>) -> anyhow::Result<()> + Send + 'static,
    {
        let now = self.now;
        self.tasks.register_delayed(name, delay, now, Box::new(task))
    }

    /// Cancel a task by name. Safe to call from inside the task itself and
    /// safe to repeat.
    pub fn cancel_task(&mut self, name: &str) -> bool {
        let cancelled = self.tasks.cancel(name);
        if cancelled {
            debug!(community = %self.name, task = name, "task cancelled");
        }
        cancelled
    }

    pub fn is_task_pending(&self, name: &str) -> bool {
        self.tasks.is_pending(name)
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    /// One step of every walk strategy: expire, evict, contact.
    pub fn walk_step(&mut self) {
        let mut walks = std::mem::take(&mut self.walks);
        let mut targets = Vec::new();
        for walk in walks.iter_mut() {
            walk.take_step(self.now, &mut self.peers, &mut |addr| targets.push(addr));
        }
        self.walks = walks;

        for addr in targets {
            if let Err(e) = self.send_introduction_request(addr) {
                warn!(community = %self.name, %addr, error = %e, "introduction request not sent");
            }
        }
    }

    /// Verified contact: sync the clock and record the sender.
    pub(crate) fn accept(
        &mut self,
        source: SocketAddr,
        public_key: &[u8; PUBLIC_KEY_LEN],
        global_time: u64,
    ) {
        self.clock.sync(global_time);
        self.stats.received += 1;
        if *public_key == self.keypair.public {
            return;
        }
        match self.peers.upsert(*public_key, source, self.now) {
            Upsert::Inserted => {
                let peer = self.peers.get(public_key).map(|p| p.short_id()).unwrap_or_default();
                let peers = self.peers.len();
                info!(community = %self.name, peer = %peer, %source, peers, "new peer");
            }
            Upsert::Moved { from } => {
                debug!(community = %self.name, %from, to = %source, "peer address changed");
            }
            Upsert::Refreshed => {}
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct Community<H: CommunityHooks> {
    hooks: H,
    ctx: CommunityContext<H>,
    routes: HashMap<u8, Route<H>>,
    state: CommunityState,
    walk_interval: Duration,
}

impl<H: CommunityHooks> Community<H> {
    /// Build the decode map and the context. Fails if the application's
    /// routes are invalid; nothing is sent until `start`.
    pub fn new(
        hooks: H,
        keypair: Arc<Keypair>,
        transport: Arc<dyn Transport>,
        settings: CommunitySettings,
        now: Instant,
    ) -> Result<Self, CommunityError> {
        let mut routes = HashMap::new();
        for route in discovery::routes::<H>() {
            routes.insert(route.message_id, route);
        }
        for route in hooks.handlers() {
            let id = route.message_id;
            if RESERVED_MESSAGE_IDS.contains(&id) {
                return Err(CommunityError::ReservedMessageId(id));
            }
            validate_schema(route.format).map_err(|source| CommunityError::InvalidFormat {
                message_id: id,
                source,
            })?;
            if routes.insert(id, route).is_some() {
                return Err(CommunityError::DuplicateMessageId(id));
            }
        }

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let prefix = Prefix::new(settings.service_id);
        debug!(community = %settings.name, ?prefix, routes = routes.len(), "community constructed");

        Ok(Self {
            hooks,
            ctx: CommunityContext {
                name: settings.name,
                keypair,
                prefix,
                clock: GlobalClock::new(),
                peers: PeerTable::new(),
                transport,
                tasks: TaskScheduler::new(),
                walks: settings.walks,
                external: None,
                rng,
                now,
                stats: CommunityStats::default(),
            },
            routes,
            state: CommunityState::Constructed,
            walk_interval: settings.walk_interval,
        })
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn context(&self) -> &CommunityContext<H> {
        &self.ctx
    }

    /// Run `f` against the application and its context at `now`. Used to
    /// trigger application actions from outside the event loop.
    pub fn with_context<R>(
        &mut self,
        now: Instant,
        f: impl FnOnce(&mut H, &mut CommunityContext<H>) -> R,
    ) -> R {
        self.ctx.now = now;
        f(&mut self.hooks, &mut self.ctx)
    }
}

fn walk_task<H>(_: &mut H, ctx: &mut CommunityContext<H>) -> anyhow::Result<()> {
    ctx.walk_step();
    Ok(())
}

// ── Overlay ──────────────────────────────────────────────────────────────────

/// Object-safe view of a community, for code that drives many of them.
pub trait Overlay: Send {
    fn name(&self) -> &str;
    fn prefix(&self) -> Prefix;
    fn state(&self) -> CommunityState;
    fn peer_count(&self) -> usize;
    fn stats(&self) -> CommunityStats;

    /// Register the walk task, run the start hook, and begin accepting
    /// traffic. Only valid once, from `Constructed`.
    fn start(&mut self, now: Instant) -> Result<(), CommunityError>;

    /// Hand one received datagram to the community.
    fn deliver(&mut self, source: SocketAddr, raw: &[u8], now: Instant) -> Delivery;

    /// Run every task due at `now`. Returns how many ran.
    fn poll(&mut self, now: Instant) -> usize;

    fn next_deadline(&self) -> Option<Instant>;

    /// Run a named application action. Only valid while running.
    fn perform(&mut self, action: &str, now: Instant) -> Result<(), CommunityError>;

    /// Run the unload hook, cancel every task and forget all peers.
    /// Repeated calls are no-ops.
    fn unload(&mut self);
}

impl<H: CommunityHooks> Overlay for Community<H> {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn prefix(&self) -> Prefix {
        self.ctx.prefix
    }

    fn state(&self) -> CommunityState {
        self.state
    }

    fn peer_count(&self) -> usize {
        self.ctx.peers.len()
    }

    fn stats(&self) -> CommunityStats {
        self.ctx.stats
    }

    fn start(&mut self, now: Instant) -> Result<(), CommunityError> {
        if self.state != CommunityState::Constructed {
            return Err(CommunityError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        self.state = CommunityState::Started;
        self.ctx.now = now;

        if !self.ctx.walks.is_empty() {
            self.ctx.tasks.register_periodic(
                WALK_TASK,
                self.walk_interval,
                true,
                now,
                Box::new(walk_task::<H>),
            )?;
        }

        if let Err(e) = self.hooks.started(&mut self.ctx) {
            self.ctx.tasks.cancel_all();
            self.state = CommunityState::Unloaded;
            return Err(CommunityError::StartFailed(format!("{e:#}")));
        }

        self.state = CommunityState::Running;
        info!(
            community = %self.ctx.name,
            key = hex::encode(&self.ctx.keypair.public[..8]),
            walks = ?self.ctx.walks.iter().map(|w| w.name()).collect::<Vec<_>>(),
            tasks = self.ctx.tasks.len(),
            "community started"
        );
        Ok(())
    }

    fn deliver(&mut self, source: SocketAddr, raw: &[u8], now: Instant) -> Delivery {
        if self.state != CommunityState::Running {
            return Delivery::NotRunning;
        }
        let Some(message_id) = peek_message_id(&self.ctx.prefix, raw) else {
            trace!(community = %self.ctx.name, %source, len = raw.len(), "foreign prefix");
            return Delivery::ForeignPrefix;
        };
        let Some(route) = self.routes.get(&message_id) else {
            self.ctx.stats.dropped += 1;
            trace!(community = %self.ctx.name, %source, message_id, "no handler");
            return Delivery::UnknownMessage { message_id };
        };

        self.ctx.now = now;
        match (route.dispatch)(&mut self.hooks, &mut self.ctx, source, raw) {
            Ok(()) => Delivery::Dispatched { message_id },
            Err(RouteError::Unpack(UnpackError::Authentication(e))) => {
                self.ctx.stats.dropped += 1;
                trace!(
                    community = %self.ctx.name,
                    %source,
                    message_id,
                    error = %e,
                    "unauthenticated"
                );
                Delivery::Unauthenticated { message_id }
            }
            Err(RouteError::Unpack(e)) => {
                self.ctx.stats.dropped += 1;
                trace!(community = %self.ctx.name, %source, message_id, error = %e, "malformed");
                Delivery::Malformed { message_id }
            }
            Err(RouteError::Handler(e)) => {
                self.ctx.stats.handler_errors += 1;
                warn!(
                    community = %self.ctx.name,
                    %source,
                    handler = route.name,
                    error = format!("{e:#}"),
                    "handler failed"
                );
                Delivery::HandlerFailed { message_id }
            }
        }
    }

    fn poll(&mut self, now: Instant) -> usize {
        if self.state != CommunityState::Running {
            return 0;
        }
        self.ctx.now = now;

        let mut ran = 0;
        for name in self.ctx.tasks.due(now) {
            let Some(mut task) = self.ctx.tasks.checkout(&name, now) else {
                continue;
            };
            ran += 1;
            if let Err(e) = (task.callback)(&mut self.hooks, &mut self.ctx) {
                self.ctx.stats.handler_errors += 1;
                warn!(
                    community = %self.ctx.name,
                    task = %name,
                    error = format!("{e:#}"),
                    "task failed"
                );
            }
            self.ctx.tasks.checkin(&name, task.generation, task.callback);
        }
        ran
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.state == CommunityState::Running {
            self.ctx.tasks.next_deadline()
        } else {
            None
        }
    }

    fn perform(&mut self, action: &str, now: Instant) -> Result<(), CommunityError> {
        if self.state != CommunityState::Running {
            return Err(CommunityError::InvalidState {
                action: "perform an action on",
                state: self.state,
            });
        }
        self.ctx.now = now;
        match self.hooks.perform(action, &mut self.ctx) {
            Ok(true) => {
                debug!(community = %self.ctx.name, action, "action performed");
                Ok(())
            }
            Ok(false) => Err(CommunityError::UnknownAction(action.to_string())),
            Err(e) => Err(CommunityError::ActionFailed {
                action: action.to_string(),
                reason: format!("{e:#}"),
            }),
        }
    }

    fn unload(&mut self) {
        if matches!(
            self.state,
            CommunityState::Unloading | CommunityState::Unloaded
        ) {
            return;
        }
        self.state = CommunityState::Unloading;
        self.hooks.unloading(&mut self.ctx);
        let cancelled = self.ctx.tasks.cancel_all();
        let peers = self.ctx.peers.len();
        self.ctx.peers.clear();
        self.state = CommunityState::Unloaded;
        info!(community = %self.ctx.name, cancelled, peers, "community unloaded");
    }
}
