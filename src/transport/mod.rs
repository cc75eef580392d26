//! Shared types emitted by both link-layer transports (§3) and consumed by
//! [`crate::registry::PeerRegistry`].

pub mod native;
pub mod wifi;

use serde::{Deserialize, Serialize};

/// Which link layer a [`RawPeerEvent`] arrived over.
///
/// Exactly one of `Bluetooth`/`MultiPeerConnectivity` is active per
/// platform; `TcpNative` (Wi-Fi/SSDP) is always active alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    TcpNative,
    Bluetooth,
    MultiPeerConnectivity,
}

/// A single observation from a transport, before any debounce/generation
/// reasoning has been applied by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPeerEvent {
    pub peer_id: String,
    pub generation: u32,
    pub available: bool,
    pub connection_type: ConnectionType,
    pub host_address: Option<String>,
    pub port_number: Option<u16>,
}

/// Radio on/off transitions, as reported by the native bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkChangedNonTcp {
    pub wifi: bool,
    pub bluetooth: bool,
    pub bluetooth_low_energy: bool,
    pub cellular: bool,
}

/// Signals that a local listener port bound to a native peer was
/// recreated after a failure; the registry must treat this as an address
/// change even if the port is bit-identical to the cached one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRecreatedAfterFailure {
    pub peer_identifier: String,
    pub port_number: u16,
}

/// `(discoveryActive, advertisingActive)` — deduplicated by the registry so
/// it fires at most once per distinct value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryAdvertisingState {
    pub discovery_active: bool,
    pub advertising_active: bool,
}
