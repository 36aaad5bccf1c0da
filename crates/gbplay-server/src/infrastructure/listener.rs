//! TCP accept loop.
//!
//! Each accepted socket becomes a [`LinkChannel`] named after the remote
//! `ip:port` and is handed to the [`SessionRegistry`].  The same loop also
//! drains the registry's session-ended notifications, so the registry is
//! only ever touched from this one task.
//!
//! Shutdown is cooperative: the loop checks the shared `running` flag at
//! least every [`ACCEPT_POLL_INTERVAL`], and on exit ends every session so
//! all consoles are disconnected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gbplay_core::{LinkChannel, LinkSettings};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::application::SessionRegistry;
use crate::domain::ServerConfig;

/// Longest the loop waits on `accept()` before re-checking the shutdown flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the configured address and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or cannot be bound (for
/// example, the port is already in use).
pub async fn run_server(config: ServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind link listener on {addr}"))?;

    info!("listening for consoles on {addr}");
    serve(listener, &config, running).await
}

/// Serves on an already bound listener until `running` is cleared.
///
/// # Errors
///
/// Currently never fails once the listener is bound; accept errors are
/// logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let (mut registry, mut events) = SessionRegistry::new(config.tetris);
    let link = config.link.settings();

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        tokio::select! {
            accepted = timeout(ACCEPT_POLL_INTERVAL, listener.accept()) => match accepted {
                Ok(Ok((stream, peer_addr))) => {
                    admit_connection(&mut registry, stream, peer_addr, link);
                }
                Ok(Err(e)) => {
                    // Transient (e.g. out of file descriptors); keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            },
            Some(event) = events.recv() => registry.handle_event(event),
        }
    }

    let remaining = registry.len();
    registry.shutdown();
    info!("ended {remaining} session(s) on shutdown");
    Ok(())
}

// ── Per-connection setup ──────────────────────────────────────────────────────

fn admit_connection(
    registry: &mut SessionRegistry,
    stream: TcpStream,
    peer_addr: SocketAddr,
    link: LinkSettings,
) {
    // Every byte is a round trip; Nagle would batch them.
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not disable Nagle for {peer_addr}: {e}");
    }

    let channel = LinkChannel::new(stream, peer_addr.to_string(), link);
    match registry.admit(channel) {
        Ok(session_id) => info!("console {peer_addr} seated in session '{session_id}'"),
        Err(e) => warn!("console {peer_addr} could not be seated: {e}"),
    }
}
