//! Builds the configured overlays.
//!
//! Which community classes exist is decided by the descriptor list handed
//! to [`launch`], not by a global registry. Each `[[overlays]]` entry names
//! a descriptor, a key alias, its walkers and bootstrap addresses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};

use overlay_community::lamport::{self, LamportCommunity};
use overlay_community::{
    Community, CommunitySettings, Overlay, RandomChurn, RandomChurnConfig, RandomWalk,
    RandomWalkConfig, Transport, WalkStrategy,
};
use overlay_core::config::{OverlayConfig, OverlaySettings};
use overlay_core::crypto::Keypair;
use overlay_core::wire::ServiceId;

use crate::dispatch::PrefixRouter;

/// Everything a descriptor needs to build one overlay.
pub struct LaunchContext {
    pub keypair: Arc<Keypair>,
    pub transport: Arc<dyn Transport>,
    pub walks: Vec<Box<dyn WalkStrategy>>,
    pub walk_interval: Duration,
    pub now: Instant,
}

impl LaunchContext {
    /// Community settings for `name`, carrying this context's walks.
    pub fn community_settings(&mut self, name: &str, service_id: ServiceId) -> CommunitySettings {
        std::mem::take(&mut self.walks).into_iter().fold(
            CommunitySettings::new(name, service_id).with_walk_interval(self.walk_interval),
            |settings, walk| settings.with_boxed_walk(walk),
        )
    }
}

/// A named way to build one kind of overlay.
pub struct CommunityDescriptor {
    pub name: &'static str,
    pub build: fn(LaunchContext) -> Result<Box<dyn Overlay>>,
}

/// The overlays this daemon knows how to run.
pub fn descriptors() -> Vec<CommunityDescriptor> {
    vec![CommunityDescriptor {
        name: lamport::DESCRIPTOR,
        build: build_lamport,
    }]
}

fn build_lamport(mut launch: LaunchContext) -> Result<Box<dyn Overlay>> {
    let settings = launch.community_settings(lamport::DESCRIPTOR, lamport::lamport_service_id());
    let community = Community::new(
        LamportCommunity::default(),
        launch.keypair,
        launch.transport,
        settings,
        launch.now,
    )?;
    Ok(Box::new(community))
}

/// Walk strategies for one overlay entry.
pub fn build_walks(
    overlay: &OverlaySettings,
    bootstrap: &[SocketAddr],
) -> Result<Vec<Box<dyn WalkStrategy>>> {
    overlay
        .walkers
        .iter()
        .map(|w| -> Result<Box<dyn WalkStrategy>> {
            match w.strategy.as_str() {
                "RandomWalk" => Ok(Box::new(RandomWalk::new(
                    RandomWalkConfig::from(w),
                    bootstrap.to_vec(),
                ))),
                "RandomChurn" => Ok(Box::new(RandomChurn::new(RandomChurnConfig::from(w)))),
                other => Err(anyhow!("unknown walk strategy '{other}'")),
            }
        })
        .collect()
}

/// Build every configured overlay into a router. Overlays are not started.
pub fn launch(
    config: &OverlayConfig,
    descriptors: &[CommunityDescriptor],
    keys: &HashMap<String, Arc<Keypair>>,
    transport: Arc<dyn Transport>,
    now: Instant,
) -> Result<PrefixRouter> {
    let mut router = PrefixRouter::new();

    for overlay in &config.overlays {
        let Some(descriptor) = descriptors.iter().find(|d| d.name == overlay.class) else {
            bail!("no descriptor for overlay class '{}'", overlay.class);
        };
        let keypair = keys
            .get(&overlay.key)
            .cloned()
            .ok_or_else(|| {
                anyhow!("overlay {} uses unknown key '{}'", overlay.class, overlay.key)
            })?;
        let bootstrap = overlay.bootstrap_addrs()?;
        let walks = build_walks(overlay, &bootstrap)
            .with_context(|| format!("overlay {}", overlay.class))?;

        let built = (descriptor.build)(LaunchContext {
            keypair,
            transport: transport.clone(),
            walks,
            walk_interval: config.network.walker_interval(),
            now,
        })
        .with_context(|| format!("failed to build overlay {}", overlay.class))?;

        tracing::info!(
            class = %overlay.class,
            key = %overlay.key,
            walkers = overlay.walkers.len(),
            bootstrap = bootstrap.len(),
            "overlay built"
        );
        router.register(built)?;
    }

    Ok(router)
}

/// Run each overlay's configured start actions. Failures are logged and do
/// not stop the daemon.
pub fn run_start_actions(config: &OverlayConfig, router: &mut PrefixRouter, now: Instant) {
    for (index, overlay) in config.overlays.iter().enumerate() {
        let Some(target) = router.get_mut(index) else {
            continue;
        };
        for action in &overlay.on_start {
            match target.perform(action, now) {
                Ok(()) => {
                    tracing::info!(class = %overlay.class, action = %action, "start action done")
                }
                Err(e) => tracing::warn!(
                    class = %overlay.class,
                    action = %action,
                    error = %e,
                    "start action failed"
                ),
            }
        }
    }
}
