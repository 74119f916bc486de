//! overlayd: runs the configured overlays on one UDP endpoint.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use overlay_community::Transport;
use overlay_core::config::OverlayConfig;

mod dispatch;
mod endpoint;
mod keys;
mod launcher;

/// Inbound datagrams buffered between the receive task and the loop.
const INBOUND_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config before tracing so the configured filter applies.
    let written = OverlayConfig::write_default_if_missing();
    let loaded = OverlayConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }
    tracing::info!(path = %OverlayConfig::file_path().display(), "overlayd starting");

    // Identities
    let keys = keys::load_all(&config.keys).context("failed to load keys")?;

    // Endpoint
    let socket = endpoint::bind(&config.network.address, config.network.port)
        .context("failed to bind UDP endpoint")?;
    tracing::info!(addr = %socket.local_addr()?, "endpoint bound");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, mut in_rx) = mpsc::channel(INBOUND_QUEUE);

    let send_task = tokio::spawn(endpoint::send_loop(
        socket.clone(),
        out_rx,
        shutdown_tx.subscribe(),
    ));
    let recv_task = tokio::spawn(endpoint::recv_loop(
        socket,
        in_tx,
        shutdown_tx.subscribe(),
    ));

    // ── Overlays ─────────────────────────────────────────────────────────────

    let transport: Arc<dyn Transport> = Arc::new(endpoint::UdpTransport::new(out_tx));
    let now = Instant::now();
    let mut router = launcher::launch(&config, &launcher::descriptors(), &keys, transport, now)?;
    router.start_all(now).context("failed to start overlays")?;
    launcher::run_start_actions(&config, &mut router, now);
    if router.is_empty() {
        tracing::warn!("no overlays configured");
    }
    for overlay in router.iter() {
        tracing::info!(name = overlay.name(), prefix = ?overlay.prefix(), "overlay running");
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    let tick = config.network.walker_interval();
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        let wake = router
            .next_deadline()
            .map_or(Instant::now() + tick, |d| d.min(Instant::now() + tick));

        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                break;
            }
            next = in_rx.recv() => {
                let Some((source, data)) = next else {
                    tracing::error!("receive task exited");
                    break;
                };
                let now = Instant::now();
                router.route(source, &data, now);
                router.poll_all(now);
            }
            _ = tokio::time::sleep_until(wake.into()) => {
                router.poll_all(Instant::now());
            }
        }
    }

    router.unload_all();
    let _ = shutdown_tx.send(());
    let _ = tokio::join!(send_task, recv_task);
    tracing::info!("overlayd stopped");

    Ok(())
}
