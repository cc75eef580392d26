//! Headless node entry point: loads `Config`, builds a [`thali::manager::Manager`],
//! and runs until a shutdown signal arrives. The teacher's desktop binary
//! wires `spawn_runtime` into a tauri app with a tray icon; this one has no
//! UI to wire into, so it's the runtime wiring alone, driven by a
//! Ctrl-C/SIGTERM hook instead of window-close events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use thali::beacon::EcdhKeyPair;
use thali::config::{Config, NativePlatform};
use thali::http::psk::HeaderPskIdentityResolver;
use thali::http::store::PlaceholderDocumentStore;
use thali::log::setup_logger;
use thali::manager::{Manager, NotificationActionHandler};
use thali::peerpool::{BoundedBackoffPolicy, PeerPool};
use thali::transport::native::LoopbackNativeBridge;
use thali::transport::ConnectionType;

fn config_dir() -> PathBuf {
    dirs_next_config_dir().join("thali")
}

/// Minimal stand-in for a `dirs`-style config-dir lookup so this binary
/// doesn't pull in another crate just for `$HOME/.config`.
fn dirs_next_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let dir = config_dir();
    setup_logger(&dir).context("failed to initialize logger")?;

    let config = Config::load(&dir.join("thali.toml")).context("failed to load configuration")?;
    log::info!("loaded configuration from {}", dir.join("thali.toml").display());

    let local = Arc::new(EcdhKeyPair::generate());
    let native_bridge = Arc::new(LoopbackNativeBridge::new(0));
    let resolver = Arc::new(HeaderPskIdentityResolver::default());
    let store = Arc::new(PlaceholderDocumentStore);
    let pool = PeerPool::new(Box::new(BoundedBackoffPolicy::default()));

    let action_handler: NotificationActionHandler = Arc::new(|action| {
        Box::pin(async move {
            log::info!(
                "replication action ready for peer {} (connection {:?})",
                action.peer_status.peer_id,
                action.peer_status.connection_type
            );
        })
    });

    let manager = Arc::new(Manager::new(
        config.clone(),
        local,
        native_bridge,
        resolver,
        store,
        action_handler,
        pool,
    ));

    // No remote keys are known ahead of time in this headless binary; a
    // real deployment would load them from its configuration or pairing
    // flow before calling start.
    let connection_type = match config.native_platform {
        NativePlatform::Android => ConnectionType::Bluetooth,
        NativePlatform::Ios => ConnectionType::MultiPeerConnectivity,
    };
    let http_bind_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    manager.start(connection_type, vec![], http_bind_addr).await?;
    log::info!("thali node listening on {http_bind_addr}");

    tokio::signal::ctrl_c().await.context("failed to install Ctrl-C handler")?;
    log::info!("shutdown signal received, stopping");
    manager.stop().await?;

    Ok(())
}
