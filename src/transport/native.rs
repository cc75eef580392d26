//! C4 NativeTransport: the adapter between a platform-specific Bluetooth /
//! Multipeer Connectivity bridge (out of scope per the purpose statement —
//! implemented natively and surfaced to us only through the [`NativeBridge`]
//! trait) and the registry's unified event stream.
//!
//! Grounded in the same spawn/cancel/channel shape as the teacher's
//! `run_beacon_listener`, but the "socket" here is an opaque bridge instead
//! of a UDP port: we don't own the radio, only the translation layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ConnectionType, DiscoveryAdvertisingState, ListenerRecreatedAfterFailure, NetworkChangedNonTcp, RawPeerEvent};
use crate::error::{Result, ThaliError};

/// A single peer-availability observation from the native bridge, before
/// it has been tagged with this node's [`ConnectionType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePeerAvailability {
    pub peer_identifier: String,
    pub generation: u32,
    pub peer_available: bool,
    pub port_number: Option<u16>,
}

/// Everything a [`NativeBridge`] implementation can push to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeBridgeEvent {
    PeerAvailability(NativePeerAvailability),
    NetworkChanged(NetworkChangedNonTcp),
    DiscoveryAdvertisingStateUpdate(DiscoveryAdvertisingState),
    ListenerRecreatedAfterFailure(ListenerRecreatedAfterFailure),
}

/// Unified event forwarded from [`NativeTransport`] into the registry —
/// `NativeBridgeEvent::PeerAvailability` tagged with our `ConnectionType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    Peer(RawPeerEvent),
    NetworkChanged(NetworkChangedNonTcp),
    DiscoveryAdvertisingState(DiscoveryAdvertisingState),
    ListenerRecreated(ListenerRecreatedAfterFailure),
}

/// The platform bridge this crate does not implement. A real build wires
/// this to Android's Bluetooth stack or iOS's Multipeer Connectivity
/// framework; `LoopbackNativeBridge` below stands in for tests.
pub trait NativeBridge: Send + Sync {
    /// Register the sink the bridge should push [`NativeBridgeEvent`]s to
    /// once it starts observing radio state. Called once, before any
    /// start method.
    fn attach(&self, events: mpsc::Sender<NativeBridgeEvent>);

    fn start_listening_for_advertisements(&self) -> Result<()>;
    fn start_advertising_and_listening(&self, peer_identifier: &str) -> Result<()>;
    fn stop_listening_for_advertisements(&self);
    fn stop_advertising_and_listening(&self);

    /// Open an on-demand connection to `peer_identifier` (iOS MPCF peers
    /// carry neither host nor port until this is called) and return the
    /// newly bound local forwarder port.
    fn connect(&self, peer_identifier: &str) -> Result<u16>;
}

pub struct NativeTransport {
    bridge: Arc<dyn NativeBridge>,
    connection_type: ConnectionType,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl NativeTransport {
    pub fn new(bridge: Arc<dyn NativeBridge>, connection_type: ConnectionType) -> Self {
        Self {
            bridge,
            connection_type,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Start listening for advertisements and forward every bridge event,
    /// translated, into `events`. Idempotent.
    pub fn start(&mut self, peer_identifier: &str, events: mpsc::Sender<NativeEvent>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (bridge_tx, mut bridge_rx) = mpsc::channel(128);
        self.bridge.attach(bridge_tx);
        self.bridge.start_listening_for_advertisements()?;
        self.bridge.start_advertising_and_listening(peer_identifier)?;

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let connection_type = self.connection_type;

        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = bridge_rx.recv() => {
                        let Some(bridge_event) = received else { break };
                        let translated = match bridge_event {
                            NativeBridgeEvent::PeerAvailability(p) => {
                                NativeEvent::Peer(RawPeerEvent {
                                    peer_id: p.peer_identifier,
                                    generation: p.generation,
                                    available: p.peer_available,
                                    connection_type,
                                    host_address: None,
                                    port_number: p.port_number,
                                })
                            }
                            NativeBridgeEvent::NetworkChanged(n) => NativeEvent::NetworkChanged(n),
                            NativeBridgeEvent::DiscoveryAdvertisingStateUpdate(s) => {
                                NativeEvent::DiscoveryAdvertisingState(s)
                            }
                            NativeBridgeEvent::ListenerRecreatedAfterFailure(l) => {
                                NativeEvent::ListenerRecreated(l)
                            }
                        };
                        if events.send(translated).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.bridge.stop_advertising_and_listening();
        self.bridge.stop_listening_for_advertisements();
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Ask the bridge to open an on-demand connection (iOS MPCF
    /// `getPeerHostInfo` path).
    pub fn connect(&self, peer_identifier: &str) -> Result<u16> {
        self.bridge.connect(peer_identifier)
    }
}

/// A deterministic, in-process stand-in for a real native bridge, used by
/// registry/manager tests to simulate Bluetooth/MPCF radio behavior
/// without any platform integration.
pub struct LoopbackNativeBridge {
    sink: Mutex<Option<mpsc::Sender<NativeBridgeEvent>>>,
    connect_port: u16,
}

impl LoopbackNativeBridge {
    pub fn new(connect_port: u16) -> Self {
        Self {
            sink: Mutex::new(None),
            connect_port,
        }
    }

    /// Test hook: push an event as if the radio had produced it.
    pub async fn emit(&self, event: NativeBridgeEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            let _ = sink.send(event).await;
        }
    }
}

impl NativeBridge for LoopbackNativeBridge {
    fn attach(&self, events: mpsc::Sender<NativeBridgeEvent>) {
        *self.sink.lock().unwrap() = Some(events);
    }

    fn start_listening_for_advertisements(&self) -> Result<()> {
        Ok(())
    }

    fn start_advertising_and_listening(&self, _peer_identifier: &str) -> Result<()> {
        Ok(())
    }

    fn stop_listening_for_advertisements(&self) {}

    fn stop_advertising_and_listening(&self) {}

    fn connect(&self, peer_identifier: &str) -> Result<u16> {
        if peer_identifier.is_empty() {
            return Err(ThaliError::PeerNotAvailable(peer_identifier.to_string()));
        }
        Ok(self.connect_port)
    }
}
