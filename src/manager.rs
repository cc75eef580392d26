//! C8 Manager: the lifecycle orchestrator. Owns every long-lived task and
//! brings them up/down in the fixed order from §4.8, replacing the source's
//! promise-chained start sequence with an explicit
//! `Stopped → Starting → Running → Stopping → Stopped` state machine (§9).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use log::info;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::beacon::{EcdhKeyPair, PublicKey};
use crate::config::Config;
use crate::error::{Result, ThaliError};
use crate::http::psk::PskIdentityResolver;
use crate::http::store::DocumentStore;
use crate::notification::client::NotificationClient;
use crate::notification::sender::NotificationSender;
use crate::notification::NotificationAction;
use crate::peerpool::PeerPool;
use crate::registry::{PeerRegistry, RegistryThresholds};
use crate::transport::native::{NativeBridge, NativeTransport};
use crate::transport::wifi::WifiTransport;
use crate::transport::ConnectionType;

pub type NotificationActionHandler =
    Arc<dyn Fn(NotificationAction) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningState {
    wifi: WifiTransport,
    native: NativeTransport,
    registry_cancel: CancellationToken,
    registry_handle: JoinHandle<()>,
    sender: NotificationSender,
    client_cancel: CancellationToken,
    client_handle: JoinHandle<()>,
    http_shutdown: oneshot::Sender<()>,
    http_handle: JoinHandle<()>,
}

struct Inner {
    state: LifecycleState,
    running: Option<RunningState>,
}

/// Brings up C1–C7 in the order §4.8 prescribes and tears them down in
/// reverse. A single `tokio::sync::Mutex` serializes `start`/`stop` calls
/// themselves (they're rare, non-hot-path operations); the tasks they
/// spawn run independently once started.
pub struct Manager {
    config: Config,
    local: Arc<EcdhKeyPair>,
    native_bridge: Arc<dyn NativeBridge>,
    resolver: Arc<dyn PskIdentityResolver>,
    store: Arc<dyn DocumentStore>,
    action_handler: NotificationActionHandler,
    pool: PeerPool,
    inner: Mutex<Inner>,
}

impl Manager {
    pub fn new(
        config: Config,
        local: Arc<EcdhKeyPair>,
        native_bridge: Arc<dyn NativeBridge>,
        resolver: Arc<dyn PskIdentityResolver>,
        store: Arc<dyn DocumentStore>,
        action_handler: NotificationActionHandler,
        pool: PeerPool,
    ) -> Self {
        Self {
            config,
            local,
            native_bridge,
            resolver,
            store,
            action_handler,
            pool,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                running: None,
            }),
        }
    }

    /// Bring the node up: C7 → HTTP router mount → transports listening and
    /// advertising → C6 publishing the first beacon. Returns
    /// `AlreadyStarted` if called again before a matching `stop`.
    pub async fn start(
        &self,
        native_connection_type: ConnectionType,
        remote_keys: Vec<PublicKey>,
        http_bind_addr: SocketAddr,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != LifecycleState::Stopped {
            return Err(ThaliError::AlreadyStarted);
        }
        inner.state = LifecycleState::Starting;

        let thresholds = RegistryThresholds {
            tcp_peer_unavailability: self.config.tcp_peer_unavailability(),
            non_tcp_peer_unavailability: self.config.non_tcp_peer_unavailability(),
            update_windows_foreground: self.config.update_windows_foreground(),
        };
        let (registry, snapshot, status_rx, _discovery_state_rx) = PeerRegistry::new(thresholds);

        let (mut sender, stream_rx, tables_rx) =
            NotificationSender::new(self.local.clone(), self.config.beacon_cipher);

        let router = crate::http::router(
            self.resolver.clone(),
            tables_rx,
            &self.config.base_db_path,
            &self.config.local_seq_point_prefix,
            stream_rx,
            self.store.clone(),
        );

        // Every fallible precondition runs before any task is spawned, so a
        // failure here never leaves `start` having half-spawned the node.
        let listener = match tokio::net::TcpListener::bind(http_bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                inner.state = LifecycleState::Stopped;
                return Err(ThaliError::Io(e));
            }
        };

        let (wifi_tx, wifi_rx) = tokio::sync::mpsc::channel(256);
        let mut wifi = WifiTransport::new(
            self.config.device_name.clone(),
            self.config.discovery_port,
            self.config.ssdp_advertisement_interval(),
        );
        if let Err(e) = wifi.start(wifi_tx) {
            inner.state = LifecycleState::Stopped;
            return Err(e);
        }

        let (native_tx, native_rx) = tokio::sync::mpsc::channel(256);
        let mut native = NativeTransport::new(self.native_bridge.clone(), native_connection_type);
        if let Err(e) = native.start(&self.config.device_name, native_tx) {
            wifi.stop().await;
            inner.state = LifecycleState::Stopped;
            return Err(e);
        }

        if let Err(e) = sender.set_beacon_keys(remote_keys.clone(), self.config.beacon_expiration()) {
            native.stop().await;
            wifi.stop().await;
            inner.state = LifecycleState::Stopped;
            return Err(e);
        }

        // From here every step is infallible: spawn the tasks and commit.

        // C7 is constructed against `snapshot`/`status_rx` obtained above,
        // before the transports or the registry task were started, so it
        // never misses an event even though its own task is spawned last:
        // nothing can publish to `status_rx` until `registry_handle` below
        // is running.
        let client = Arc::new(NotificationClient::new(
            self.local.clone(),
            self.config.beacon_cipher,
            remote_keys,
            snapshot,
            self.pool.clone(),
            self.action_handler.clone(),
            self.native_bridge.clone(),
        ));
        let client_cancel = CancellationToken::new();
        let client_handle = tokio::spawn(client.run(status_rx, client_cancel.clone()));

        // mobile.start(router, pskIdToSecret): accept HTTP connections on
        // the admission-gated router.
        let (http_shutdown, http_shutdown_rx) = oneshot::channel();
        let http_handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = http_shutdown_rx.await;
            });
            if let Err(e) = server.await {
                log::error!("HTTP server exited with an error: {e}");
            }
        });

        let registry_cancel = CancellationToken::new();
        let registry_handle = tokio::spawn(registry.run(wifi_rx, native_rx, registry_cancel.clone()));

        inner.running = Some(RunningState {
            wifi,
            native,
            registry_cancel,
            registry_handle,
            sender,
            client_cancel,
            client_handle,
            http_shutdown,
            http_handle,
        });
        inner.state = LifecycleState::Running;
        info!("thali manager started");
        Ok(())
    }

    /// Tear the node down in the mirror of `start`'s order. Returns
    /// `NotStarted` if called while stopped.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != LifecycleState::Running {
            return Err(ThaliError::NotStarted);
        }
        inner.state = LifecycleState::Stopping;

        let Some(mut running) = inner.running.take() else {
            inner.state = LifecycleState::Stopped;
            return Ok(());
        };

        running.sender.stop();

        running.registry_cancel.cancel();
        let _ = running.registry_handle.await;

        running.native.stop().await;
        running.wifi.stop().await;

        let _ = running.http_shutdown.send(());
        let _ = running.http_handle.await;

        running.client_cancel.cancel();
        let _ = running.client_handle.await;

        inner.state = LifecycleState::Stopped;
        info!("thali manager stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::psk::HeaderPskIdentityResolver;
    use crate::http::store::PlaceholderDocumentStore;
    use crate::peerpool::ImmediateStartPolicy;
    use crate::transport::native::LoopbackNativeBridge;

    fn manager() -> Manager {
        let action_handler: NotificationActionHandler = Arc::new(|_action| Box::pin(async {}));
        Manager::new(
            Config {
                discovery_port: 0,
                ..Config::default()
            },
            Arc::new(EcdhKeyPair::generate()),
            Arc::new(LoopbackNativeBridge::new(0)),
            Arc::new(HeaderPskIdentityResolver::default()),
            Arc::new(PlaceholderDocumentStore),
            action_handler,
            PeerPool::new(Box::new(ImmediateStartPolicy)),
        )
    }

    #[tokio::test]
    async fn double_start_without_stop_fails() {
        let manager = manager();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        manager
            .start(ConnectionType::Bluetooth, vec![], addr)
            .await
            .unwrap();

        let second_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let err = manager
            .start(ConnectionType::Bluetooth, vec![], second_addr)
            .await
            .unwrap_err();
        assert!(matches!(err, ThaliError::AlreadyStarted));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_fails() {
        let manager = manager();
        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, ThaliError::NotStarted));
    }

    #[tokio::test]
    async fn start_then_stop_then_start_succeeds() {
        let manager = manager();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        manager
            .start(ConnectionType::Bluetooth, vec![], addr)
            .await
            .unwrap();
        manager.stop().await.unwrap();
        manager
            .start(ConnectionType::Bluetooth, vec![], addr)
            .await
            .unwrap();
        manager.stop().await.unwrap();
    }
}
