//! Peer discovery, notification beacons, and replication admission for an
//! opportunistic-sync node: SSDP/native peer discovery feeding a
//! single-owner registry, ECDH notification beacons gating pull
//! replication, and a PSK-role admission gate in front of a pluggable
//! document store.

pub mod beacon;
pub mod config;
pub mod error;
pub mod http;
pub mod log;
pub mod manager;
pub mod notification;
pub mod peerpool;
pub mod registry;
pub mod transport;
