//! C7 NotificationClient: reacts to registry availability events by
//! fetching and parsing the peer's beacon stream, then hands any match to
//! the peer pool as a pull-replication action. The subscribe/react shape
//! mirrors the teacher's `run_peer_connector` scanning `DiscoveredPeers`,
//! generalized from a polling scan to a broadcast-driven reaction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::beacon::{self, CipherSuite, EcdhKeyPair, KeyHash, PublicKey};
use crate::peerpool::PeerPool;
use crate::registry::{PeerStatus, RegistrySnapshot};
use crate::transport::native::NativeBridge;
use crate::transport::ConnectionType;

use super::NotificationAction;

type BoxedAction = Pin<Box<dyn Future<Output = ()> + Send>>;
type ActionFactory = Arc<dyn Fn(NotificationAction) -> BoxedAction + Send + Sync>;

const NOTIFICATION_BEACONS_PATH: &str = "/NotificationBeacons";

/// Local forwarder peers are dialed through, once the native bridge opens
/// an on-demand connection for them (§4.5, MPCF `getPeerHostInfo`).
const LOCAL_FORWARDER_HOST: &str = "127.0.0.1";

pub struct NotificationClient {
    http: reqwest::Client,
    local: Arc<EcdhKeyPair>,
    suite: CipherSuite,
    address_book: RwLock<HashMap<KeyHash, PublicKey>>,
    snapshot: RegistrySnapshot,
    pool: PeerPool,
    action_factory: ActionFactory,
    native_bridge: Arc<dyn NativeBridge>,
}

impl NotificationClient {
    pub fn new(
        local: Arc<EcdhKeyPair>,
        suite: CipherSuite,
        remote_keys: Vec<PublicKey>,
        snapshot: RegistrySnapshot,
        pool: PeerPool,
        action_factory: ActionFactory,
        native_bridge: Arc<dyn NativeBridge>,
    ) -> Self {
        let address_book = remote_keys.into_iter().map(|k| (k.hash(), k)).collect();
        Self {
            http: reqwest::Client::new(),
            local,
            suite,
            address_book: RwLock::new(address_book),
            snapshot,
            pool,
            action_factory,
            native_bridge,
        }
    }

    /// Consume `status_rx` until `cancel` fires, reacting to every
    /// availability transition.
    pub async fn run(self: Arc<Self>, mut status_rx: broadcast::Receiver<PeerStatus>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = status_rx.recv() => {
                    match received {
                        Ok(status) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.handle_status(status).await });
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("notification client lagged by {n} peer-status events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn handle_status(&self, status: PeerStatus) {
        let key = (status.connection_type, status.peer_id.clone());

        if !status.available {
            self.pool.cancel(&key);
            return;
        }

        let Ok(host_info) = self.snapshot.get_peer_host_info(&status.peer_id, status.connection_type) else {
            return;
        };

        let (host, port) = match (host_info.host_address, host_info.port_number) {
            (Some(host), Some(port)) => (host, port),
            _ if status.connection_type == ConnectionType::MultiPeerConnectivity => {
                // MPCF peers carry no host/port until a connection is
                // opened on demand; the bridge hands back the newly bound
                // local forwarder port to dial instead (§4.5).
                let port = match self.native_bridge.connect(&status.peer_id) {
                    Ok(port) => port,
                    Err(e) => {
                        debug!("on-demand connect to {} failed: {e}", status.peer_id);
                        return;
                    }
                };
                (LOCAL_FORWARDER_HOST.to_string(), port)
            }
            _ => return,
        };

        let url = format!("http://{host}:{port}{NOTIFICATION_BEACONS_PATH}");
        let response = match self
            .http
            .get(&url)
            .header("X-Thali-PSK-Identity", crate::notification::sender::BEACON_PSK_ID)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("beacon fetch from {url} failed: {e}");
                return;
            }
        };

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!("beacon body read from {url} failed: {e}");
                return;
            }
        };

        let address_book = self.address_book.read();
        let lookup = |hash: &KeyHash| address_book.get(hash).cloned();
        let parsed = match beacon::parse(&body, &self.local, self.suite, lookup) {
            Ok(p) => p,
            Err(e) => {
                debug!("malformed beacon stream from {url}: {e}");
                return;
            }
        };

        let Some(hash) = parsed else {
            return;
        };
        let Some(remote_public_key) = address_book.get(&hash).cloned() else {
            return;
        };
        drop(address_book);

        let action = NotificationAction {
            remote_public_key,
            peer_status: status,
        };
        let boxed = (self.action_factory)(action);
        self.pool.submit(key, boxed);
    }
}
