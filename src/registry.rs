//! C5 PeerRegistry: the single-owner task that merges the Wi-Fi and native
//! raw event streams into one deduplicated `peerAvailabilityChanged`
//! stream, per §4.5. State ownership and the message-driven shape follow
//! the teacher's `DiscoveredPeers` map, generalized from "one map read by
//! whoever needs it" into "one task that owns the map and publishes both a
//! broadcast stream and a read-only snapshot" so `getPeerHostInfo` can stay
//! lock-free for callers while every state *transition* is still folded by
//! a single owner (§5 concurrency model).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ThaliError};
use crate::transport::native::NativeEvent;
use crate::transport::{ConnectionType, DiscoveryAdvertisingState, RawPeerEvent};

pub type PeerKey = (ConnectionType, String);

/// Emitted once per accepted state transition (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub peer_id: String,
    pub connection_type: ConnectionType,
    pub generation: u32,
    pub available: bool,
    /// `None` on unavailability, `Some(false)` on first discovery,
    /// `Some(true)`/`Some(false)` on re-announcement depending on whether
    /// the host/port tuple changed.
    pub new_address_port: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host_address: Option<String>,
    pub port_number: Option<u16>,
    pub suggested_tcp_timeout: Duration,
}

struct RegistryEntry {
    generation: u32,
    host_address: Option<String>,
    port_number: Option<u16>,
    last_accepted_at: Instant,
    epoch: u64,
}

/// Thresholds pulled out of `Config` so the registry itself carries no
/// global state (§9 "Global mutability of tunables").
pub struct RegistryThresholds {
    pub tcp_peer_unavailability: Duration,
    pub non_tcp_peer_unavailability: Duration,
    pub update_windows_foreground: Duration,
}

type TimerKey = (Instant, ConnectionType, String, u64);

pub struct PeerRegistry {
    entries: HashMap<PeerKey, RegistryEntry>,
    timers: BinaryHeap<Reverse<TimerKey>>,
    next_epoch: u64,
    radio_state: crate::transport::NetworkChangedNonTcp,
    thresholds: RegistryThresholds,
    status_tx: broadcast::Sender<PeerStatus>,
    discovery_state_tx: watch::Sender<DiscoveryAdvertisingState>,
    snapshot: Arc<RwLock<HashMap<PeerKey, HostInfo>>>,
}

/// Cheap, cloneable read handle for `getPeerHostInfo` lookups — a
/// consistent snapshot of whatever the registry task last published.
#[derive(Clone)]
pub struct RegistrySnapshot(Arc<RwLock<HashMap<PeerKey, HostInfo>>>);

impl RegistrySnapshot {
    pub fn get_peer_host_info(&self, peer_id: &str, connection_type: ConnectionType) -> Result<HostInfo> {
        self.0
            .read()
            .get(&(connection_type, peer_id.to_string()))
            .cloned()
            .ok_or_else(|| ThaliError::PeerNotAvailable(peer_id.to_string()))
    }
}

const SUGGESTED_TCP_TIMEOUT: Duration = Duration::from_secs(10);

impl PeerRegistry {
    pub fn new(
        thresholds: RegistryThresholds,
    ) -> (
        Self,
        RegistrySnapshot,
        broadcast::Receiver<PeerStatus>,
        watch::Receiver<DiscoveryAdvertisingState>,
    ) {
        let (status_tx, status_rx) = broadcast::channel(256);
        let (discovery_state_tx, discovery_state_rx) =
            watch::channel(DiscoveryAdvertisingState::default());
        let snapshot = Arc::new(RwLock::new(HashMap::new()));

        let registry = Self {
            entries: HashMap::new(),
            timers: BinaryHeap::new(),
            next_epoch: 0,
            // Radios assumed on until a networkChanged event says otherwise.
            radio_state: crate::transport::NetworkChangedNonTcp {
                wifi: true,
                bluetooth: true,
                bluetooth_low_energy: true,
                cellular: true,
            },
            thresholds,
            status_tx,
            discovery_state_tx,
            snapshot: snapshot.clone(),
        };

        (registry, RegistrySnapshot(snapshot), status_rx, discovery_state_rx)
    }

    /// Drive the registry to completion. Consumes raw events from both
    /// transports, folds them into state, and emits deduplicated status
    /// and discovery-state updates until `cancel` fires. On cancellation
    /// every entry is dropped silently — no unavailability events (§5).
    pub async fn run(
        mut self,
        mut rx_wifi: mpsc::Receiver<RawPeerEvent>,
        mut rx_native: mpsc::Receiver<NativeEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let sleep_until = self
                .timers
                .peek()
                .map(|Reverse((deadline, ..))| *deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = rx_wifi.recv() => {
                    self.handle_raw(event);
                }
                Some(event) = rx_native.recv() => {
                    self.handle_native(event);
                }
                _ = tokio::time::sleep_until(sleep_until) => {
                    self.fire_expired_timers();
                }
                else => break,
            }
        }
    }

    fn handle_native(&mut self, event: NativeEvent) {
        match event {
            NativeEvent::Peer(raw) => self.handle_raw(raw),
            NativeEvent::NetworkChanged(n) => self.handle_network_changed(n),
            NativeEvent::DiscoveryAdvertisingState(s) => self.handle_discovery_state(s),
            NativeEvent::ListenerRecreated(l) => self.handle_listener_recreated(l),
        }
    }

    fn handle_discovery_state(&mut self, state: DiscoveryAdvertisingState) {
        if *self.discovery_state_tx.borrow() != state {
            let _ = self.discovery_state_tx.send(state);
        }
    }

    fn handle_listener_recreated(&mut self, l: crate::transport::ListenerRecreatedAfterFailure) {
        for ct in [ConnectionType::Bluetooth, ConnectionType::MultiPeerConnectivity] {
            let key = (ct, l.peer_identifier.clone());
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.port_number = Some(l.port_number);
                entry.last_accepted_at = Instant::now();
                entry.epoch += 1;
                let epoch = entry.epoch;
                let generation = entry.generation;
                self.arm_timer(&key, epoch, Self::threshold_for(ct, &self.thresholds));
                self.publish_snapshot(&key);
                self.emit(PeerStatus {
                    peer_id: l.peer_identifier,
                    connection_type: ct,
                    generation,
                    available: true,
                    new_address_port: Some(true),
                });
                return;
            }
        }
    }

    fn threshold_for(ct: ConnectionType, thresholds: &RegistryThresholds) -> Duration {
        match ct {
            ConnectionType::TcpNative => thresholds.tcp_peer_unavailability,
            ConnectionType::Bluetooth | ConnectionType::MultiPeerConnectivity => {
                thresholds.non_tcp_peer_unavailability
            }
        }
    }

    fn handle_network_changed(&mut self, new: crate::transport::NetworkChangedNonTcp) {
        let was_wifi = self.radio_state.wifi;
        let was_bluetooth = self.radio_state.bluetooth;
        self.radio_state = new;

        if was_wifi && !new.wifi {
            self.drop_all(ConnectionType::TcpNative);
        }
        if was_bluetooth && !new.bluetooth {
            self.drop_all(ConnectionType::Bluetooth);
        }

        let mpcf_was_unavailable = !was_wifi && !was_bluetooth;
        let mpcf_now_unavailable = !new.wifi && !new.bluetooth;
        if mpcf_now_unavailable && !mpcf_was_unavailable {
            self.drop_all(ConnectionType::MultiPeerConnectivity);
        }
    }

    fn drop_all(&mut self, connection_type: ConnectionType) {
        let keys: Vec<PeerKey> = self
            .entries
            .keys()
            .filter(|(ct, _)| *ct == connection_type)
            .cloned()
            .collect();
        for key in keys {
            self.remove_and_emit_unavailable(&key);
        }
    }

    fn handle_raw(&mut self, event: RawPeerEvent) {
        let key: PeerKey = (event.connection_type, event.peer_id.clone());

        if !event.available {
            // Explicit removal: ignored if not cached, so it never
            // produces a spurious unavailability emission.
            if self.entries.contains_key(&key) {
                self.remove_and_emit_unavailable(&key);
            }
            return;
        }

        let now = Instant::now();
        let Some(existing) = self.entries.get(&key) else {
            self.insert_new(key, event, now);
            return;
        };

        let identical_tuple = existing.generation == event.generation
            && existing.host_address == event.host_address
            && existing.port_number == event.port_number;

        if identical_tuple {
            let elapsed = now.duration_since(existing.last_accepted_at);
            let rearm_as_new_cycle = matches!(key.0, ConnectionType::Bluetooth)
                && elapsed >= self.thresholds.update_windows_foreground;
            if rearm_as_new_cycle {
                self.accept(key, event, now, false);
            } else {
                // Pure debounce: no emit, but §3 still requires the
                // unavailability timer to reset on every observation.
                self.touch(&key, now);
            }
            return;
        }

        let accept = match key.0 {
            ConnectionType::TcpNative => {
                existing.host_address != event.host_address || existing.port_number != event.port_number
            }
            ConnectionType::MultiPeerConnectivity => event.generation > existing.generation,
            ConnectionType::Bluetooth => true, // any non-identical generation/tuple is accepted
        };

        if !accept {
            return;
        }

        let new_address_port = existing.host_address != event.host_address || existing.port_number != event.port_number;
        self.accept(key, event, now, new_address_port);
    }

    fn insert_new(&mut self, key: PeerKey, event: RawPeerEvent, now: Instant) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.entries.insert(
            key.clone(),
            RegistryEntry {
                generation: event.generation,
                host_address: event.host_address.clone(),
                port_number: event.port_number,
                last_accepted_at: now,
                epoch,
            },
        );
        self.arm_timer(&key, epoch, Self::threshold_for(key.0, &self.thresholds));
        self.publish_snapshot(&key);
        self.emit(PeerStatus {
            peer_id: key.1,
            connection_type: key.0,
            generation: event.generation,
            available: true,
            new_address_port: Some(false),
        });
    }

    fn accept(&mut self, key: PeerKey, event: RawPeerEvent, now: Instant, new_address_port: bool) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.generation = event.generation;
            entry.host_address = event.host_address.clone();
            entry.port_number = event.port_number;
            entry.last_accepted_at = now;
            entry.epoch = epoch;
        }
        self.arm_timer(&key, epoch, Self::threshold_for(key.0, &self.thresholds));
        self.publish_snapshot(&key);
        self.emit(PeerStatus {
            peer_id: key.1,
            connection_type: key.0,
            generation: event.generation,
            available: true,
            new_address_port: Some(new_address_port),
        });
    }

    /// Reset the unavailability timer for an identical-tuple re-observation
    /// without emitting a `PeerStatus` (§3: timer resets on every
    /// observation, but nothing actually changed so there's nothing to
    /// report).
    fn touch(&mut self, key: &PeerKey, now: Instant) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accepted_at = now;
                entry.epoch = epoch;
            }
            None => return,
        }
        self.arm_timer(key, epoch, Self::threshold_for(key.0, &self.thresholds));
    }

    fn arm_timer(&mut self, key: &PeerKey, epoch: u64, threshold: Duration) {
        let deadline = Instant::now() + threshold;
        self.timers
            .push(Reverse((deadline, key.0, key.1.clone(), epoch)));
    }

    fn fire_expired_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((deadline, ct, peer_id, epoch))) = self.timers.peek().cloned() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            let key = (ct, peer_id);
            if let Some(entry) = self.entries.get(&key) {
                if entry.epoch == epoch {
                    self.remove_and_emit_unavailable(&key);
                }
            }
        }
    }

    fn remove_and_emit_unavailable(&mut self, key: &PeerKey) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        self.snapshot.write().remove(key);
        self.emit(PeerStatus {
            peer_id: key.1.clone(),
            connection_type: key.0,
            generation: entry.generation,
            available: false,
            new_address_port: None,
        });
    }

    fn publish_snapshot(&self, key: &PeerKey) {
        if let Some(entry) = self.entries.get(key) {
            self.snapshot.write().insert(
                key.clone(),
                HostInfo {
                    host_address: entry.host_address.clone(),
                    port_number: entry.port_number,
                    suggested_tcp_timeout: SUGGESTED_TCP_TIMEOUT,
                },
            );
        }
    }

    fn emit(&self, status: PeerStatus) {
        let _ = self.status_tx.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ListenerRecreatedAfterFailure;
    use std::time::Duration as StdDuration;

    fn thresholds() -> RegistryThresholds {
        RegistryThresholds {
            tcp_peer_unavailability: StdDuration::from_millis(200),
            non_tcp_peer_unavailability: StdDuration::from_millis(200),
            update_windows_foreground: StdDuration::from_millis(150),
        }
    }

    fn wifi_event(peer: &str, port: u16, gen: u32) -> RawPeerEvent {
        RawPeerEvent {
            peer_id: peer.into(),
            generation: gen,
            available: true,
            connection_type: ConnectionType::TcpNative,
            host_address: Some("127.0.0.1".into()),
            port_number: Some(port),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_wifi_advertisement_emits_once() {
        let (registry, _snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (wifi_tx, wifi_rx) = mpsc::channel(8);
        let (_native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        wifi_tx.send(wifi_event("peer-a", 54321, 0)).await.unwrap();
        wifi_tx.send(wifi_event("peer-a", 54321, 0)).await.unwrap();

        let first = status_rx.recv().await.unwrap();
        assert!(first.available);
        assert_eq!(first.new_address_port, Some(false));

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(status_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_wifi_advertisement_resets_unavailability_timer() {
        let (registry, _snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (wifi_tx, wifi_rx) = mpsc::channel(8);
        let (_native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        wifi_tx.send(wifi_event("peer-a", 54321, 0)).await.unwrap();
        let first = status_rx.recv().await.unwrap();
        assert!(first.available);

        // Re-advertise the identical tuple faster than the unavailability
        // threshold, several times in a row, well past that threshold's
        // total duration. If the debounce path failed to reset the timer,
        // the peer would be spuriously declared unavailable partway
        // through this loop.
        for _ in 0..5 {
            tokio::time::sleep(StdDuration::from_millis(120)).await;
            wifi_tx.send(wifi_event("peer-a", 54321, 0)).await.unwrap();
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(status_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wifi_address_change_emits_new_address_port_true() {
        let (registry, _snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (wifi_tx, wifi_rx) = mpsc::channel(8);
        let (_native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        wifi_tx.send(wifi_event("peer-b", 54321, 0)).await.unwrap();
        let first = status_rx.recv().await.unwrap();
        assert_eq!(first.new_address_port, Some(false));

        wifi_tx.send(wifi_event("peer-b", 54322, 0)).await.unwrap();
        let second = status_rx.recv().await.unwrap();
        assert_eq!(second.new_address_port, Some(true));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn native_silence_timeout_emits_unavailable_and_clears_snapshot() {
        let (registry, snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (_wifi_tx, wifi_rx) = mpsc::channel(8);
        let (native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        native_tx
            .send(NativeEvent::Peer(RawPeerEvent {
                peer_id: "native-1".into(),
                generation: 1,
                available: true,
                connection_type: ConnectionType::Bluetooth,
                host_address: None,
                port_number: Some(9000),
            }))
            .await
            .unwrap();

        let first = status_rx.recv().await.unwrap();
        assert!(first.available);
        assert!(snapshot
            .get_peer_host_info("native-1", ConnectionType::Bluetooth)
            .is_ok());

        tokio::time::sleep(StdDuration::from_millis(400)).await;

        let gone = status_rx.recv().await.unwrap();
        assert!(!gone.available);
        assert_eq!(gone.new_address_port, None);
        assert!(snapshot
            .get_peer_host_info("native-1", ConnectionType::Bluetooth)
            .is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mpcf_goes_unavailable_only_when_both_radios_off() {
        let (registry, _snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (_wifi_tx, wifi_rx) = mpsc::channel(8);
        let (native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        native_tx
            .send(NativeEvent::Peer(RawPeerEvent {
                peer_id: "mpcf-1".into(),
                generation: 1,
                available: true,
                connection_type: ConnectionType::MultiPeerConnectivity,
                host_address: None,
                port_number: None,
            }))
            .await
            .unwrap();
        let _ = status_rx.recv().await.unwrap();

        native_tx
            .send(NativeEvent::NetworkChanged(crate::transport::NetworkChangedNonTcp {
                wifi: true,
                bluetooth: false,
                bluetooth_low_energy: false,
                cellular: true,
            }))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(status_rx.try_recv().is_err());

        native_tx
            .send(NativeEvent::NetworkChanged(crate::transport::NetworkChangedNonTcp {
                wifi: false,
                bluetooth: false,
                bluetooth_low_energy: false,
                cellular: true,
            }))
            .await
            .unwrap();
        let unavailable = status_rx.recv().await.unwrap();
        assert!(!unavailable.available);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn listener_recreated_forces_new_address_port_even_if_port_unchanged() {
        let (registry, _snapshot, mut status_rx, _disc_rx) = PeerRegistry::new(thresholds());
        let (_wifi_tx, wifi_rx) = mpsc::channel(8);
        let (native_tx, native_rx) = mpsc::channel::<NativeEvent>(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registry.run(wifi_rx, native_rx, cancel.clone()));

        native_tx
            .send(NativeEvent::Peer(RawPeerEvent {
                peer_id: "mpcf-2".into(),
                generation: 1,
                available: true,
                connection_type: ConnectionType::MultiPeerConnectivity,
                host_address: None,
                port_number: Some(7000),
            }))
            .await
            .unwrap();
        let _ = status_rx.recv().await.unwrap();

        native_tx
            .send(NativeEvent::ListenerRecreated(ListenerRecreatedAfterFailure {
                peer_identifier: "mpcf-2".into(),
                port_number: 7000,
            }))
            .await
            .unwrap();
        let recreated = status_rx.recv().await.unwrap();
        assert_eq!(recreated.new_address_port, Some(true));

        cancel.cancel();
        handle.await.unwrap();
    }
}
