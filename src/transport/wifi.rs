//! C3 WifiTransport: SSDP-style advertise/listen over UDP broadcast,
//! adapted from the teacher's `run_beacon_broadcaster`/`run_beacon_listener`
//! pair — same reusable-socket bind dance, generalized from a JSON
//! clipboard-discovery beacon to the spec's `peerIdentifier:generation` USN
//! line and a `RawPeerEvent` instead of a `DiscoveredPeer` map.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::{ConnectionType, RawPeerEvent};
use crate::error::{Result, ThaliError};

/// Bind a UDP socket with `SO_REUSEADDR`/`SO_REUSEPORT` so the advertiser
/// and listener — and multiple nodes on one dev box — can share the
/// discovery port.
fn bind_reusable_udp(port: u16) -> std::io::Result<UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

fn encode_usn(peer_id: &str, generation: u32) -> Vec<u8> {
    format!("{peer_id}:{generation}").into_bytes()
}

fn decode_usn(datagram: &[u8]) -> Option<(String, u32)> {
    let line = std::str::from_utf8(datagram).ok()?;
    let (peer_id, generation) = line.rsplit_once(':')?;
    let generation: u32 = generation.parse().ok()?;
    Some((peer_id.to_string(), generation))
}

/// Idempotent advertise/listen pair over a shared broadcast port.
pub struct WifiTransport {
    peer_id: String,
    discovery_port: u16,
    advertisement_interval: std::time::Duration,
    generation: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WifiTransport {
    pub fn new(
        peer_id: String,
        discovery_port: u16,
        advertisement_interval: std::time::Duration,
    ) -> Self {
        Self {
            peer_id,
            discovery_port,
            advertisement_interval,
            generation: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Start advertising and listening. Calling this again while already
    /// running is a no-op (idempotent per §4.3).
    pub fn start(&mut self, events: mpsc::Sender<RawPeerEvent>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listen_socket = bind_reusable_udp(self.discovery_port).map_err(ThaliError::Io)?;
        let advertise_socket = bind_reusable_udp(0).map_err(ThaliError::Io)?;
        advertise_socket.set_broadcast(true).map_err(ThaliError::Io)?;

        self.cancel = CancellationToken::new();

        let listener = {
            let own_peer_id = self.peer_id.clone();
            let cancel = self.cancel.clone();
            let events = events.clone();
            tokio::spawn(async move {
                run_listener(listen_socket, own_peer_id, events, cancel).await;
            })
        };

        let advertiser = {
            let peer_id = self.peer_id.clone();
            let generation = self.generation.clone();
            let port = self.discovery_port;
            let interval_dur = self.advertisement_interval;
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_advertiser(advertise_socket, peer_id, generation, port, interval_dur, cancel)
                    .await;
            })
        };

        self.handles = vec![listener, advertiser];
        Ok(())
    }

    /// Stop advertising and listening. Idempotent: calling `stop` when not
    /// running is a no-op.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Bump our own USN generation — called whenever the local identity or
    /// advertised state changes in a way peers should notice as a new
    /// advertisement cycle.
    pub fn bump_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

async fn run_advertiser(
    socket: UdpSocket,
    peer_id: String,
    generation: Arc<AtomicU32>,
    port: u16,
    advertisement_interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let broadcast_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    let mut tick = interval(advertisement_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let usn = encode_usn(&peer_id, generation.load(Ordering::SeqCst));
                if let Err(e) = socket.send_to(&usn, broadcast_addr).await {
                    warn!("SSDP advertiser send failed: {e}");
                }
            }
        }
    }
    debug!("SSDP advertiser stopped");
}

async fn run_listener(
    socket: UdpSocket,
    own_peer_id: String,
    events: mpsc::Sender<RawPeerEvent>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        let Some((peer_id, generation)) = decode_usn(&buf[..len]) else {
                            continue;
                        };
                        if peer_id == own_peer_id {
                            continue;
                        }
                        let event = RawPeerEvent {
                            peer_id,
                            generation,
                            available: true,
                            connection_type: ConnectionType::TcpNative,
                            host_address: Some(src.ip().to_string()),
                            port_number: Some(src.port()),
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("SSDP listener recv error: {e}");
                    }
                }
            }
        }
    }
    debug!("SSDP listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usn_round_trips() {
        let encoded = encode_usn("peer-123", 42);
        let (peer_id, generation) = decode_usn(&encoded).unwrap();
        assert_eq!(peer_id, "peer-123");
        assert_eq!(generation, 42);
    }

    #[test]
    fn usn_rejects_garbage() {
        assert!(decode_usn(b"not-a-usn-line").is_none());
    }
}
