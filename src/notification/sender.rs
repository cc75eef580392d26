//! C6 NotificationSender: owns the currently published beacon stream and
//! the PSK tables it implies, rotating both before the beacon expires.
//! Publication is a plain `watch` swap — the "shared immutable snapshot"
//! redesign from §9 replacing the cyclic Manager↔Sender↔middleware
//! ownership the source had.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hkdf::Hkdf;
use sha2::Sha256;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::beacon::{self, CipherSuite, EcdhKeyPair, PublicKey};
use crate::error::Result;

/// Fixed beacon identity (§6): secret is 16 zero bytes, known to every
/// peer so anyone can fetch `/NotificationBeacons` without prior pairing.
pub const BEACON_PSK_ID: &str = "beacons";
pub const BEACON_KEY: [u8; 16] = [0u8; 16];

#[derive(Debug, Clone, Default)]
pub struct PskTables {
    pub id_to_secret: HashMap<String, [u8; 16]>,
    pub id_to_public_key: HashMap<String, PublicKey>,
}

fn derive_session_secret(shared_secret: &[u8; 32], psk_id: &str) -> [u8; 16] {
    let hk = Hkdf::<Sha256>::new(Some(b"thali-psk-session"), shared_secret);
    let mut okm = [0u8; 16];
    hk.expand(psk_id.as_bytes(), &mut okm)
        .expect("16 is a valid HKDF-SHA256 output length");
    okm
}

fn publish(
    stream_tx: &watch::Sender<Arc<Vec<u8>>>,
    tables_tx: &watch::Sender<Arc<PskTables>>,
    local: &EcdhKeyPair,
    suite: CipherSuite,
    recipients: &[PublicKey],
    expiration_seconds: i64,
) -> Result<()> {
    let stream = beacon::generate(recipients, local, expiration_seconds, suite)?;

    let mut id_to_secret = HashMap::new();
    let mut id_to_public_key = HashMap::new();
    id_to_secret.insert(BEACON_PSK_ID.to_string(), BEACON_KEY);

    for recipient in recipients {
        let psk_id = recipient.hash().to_base64();
        let shared = local.diffie_hellman(recipient);
        let secret = derive_session_secret(&shared, &psk_id);
        id_to_secret.insert(psk_id.clone(), secret);
        id_to_public_key.insert(psk_id, recipient.clone());
    }

    let _ = stream_tx.send(Arc::new(stream));
    let _ = tables_tx.send(Arc::new(PskTables {
        id_to_secret,
        id_to_public_key,
    }));
    Ok(())
}

pub struct NotificationSender {
    local: Arc<EcdhKeyPair>,
    suite: CipherSuite,
    stream_tx: watch::Sender<Arc<Vec<u8>>>,
    tables_tx: watch::Sender<Arc<PskTables>>,
    rotation_cancel: CancellationToken,
    rotation_handle: Option<JoinHandle<()>>,
}

impl NotificationSender {
    pub fn new(
        local: Arc<EcdhKeyPair>,
        suite: CipherSuite,
    ) -> (Self, watch::Receiver<Arc<Vec<u8>>>, watch::Receiver<Arc<PskTables>>) {
        let (stream_tx, stream_rx) = watch::channel(Arc::new(Vec::new()));
        let (tables_tx, tables_rx) = watch::channel(Arc::new(PskTables::default()));
        let sender = Self {
            local,
            suite,
            stream_tx,
            tables_tx,
            rotation_cancel: CancellationToken::new(),
            rotation_handle: None,
        };
        (sender, stream_rx, tables_rx)
    }

    /// Replace the published beacon stream and PSK tables, and schedule a
    /// rotation `expiration` before they'd otherwise go stale.
    pub fn set_beacon_keys(&mut self, recipients: Vec<PublicKey>, expiration: Duration) -> Result<()> {
        if let Some(handle) = self.rotation_handle.take() {
            handle.abort();
        }
        self.rotation_cancel.cancel();
        self.rotation_cancel = CancellationToken::new();

        let expiration_seconds = expiration.as_secs().min(86_400) as i64;
        publish(
            &self.stream_tx,
            &self.tables_tx,
            &self.local,
            self.suite,
            &recipients,
            expiration_seconds,
        )?;

        let stream_tx = self.stream_tx.clone();
        let tables_tx = self.tables_tx.clone();
        let local = self.local.clone();
        let suite = self.suite;
        let cancel = self.rotation_cancel.clone();
        self.rotation_handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(expiration) => {
                    let _ = publish(&stream_tx, &tables_tx, &local, suite, &recipients, expiration_seconds);
                }
            }
        }));

        Ok(())
    }

    pub fn stop(&mut self) {
        self.rotation_cancel.cancel();
        if let Some(handle) = self.rotation_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_beacon_keys_publishes_stream_and_fixed_beacon_identity() {
        let local = Arc::new(EcdhKeyPair::generate());
        let recipient = EcdhKeyPair::generate();
        let (mut sender, stream_rx, tables_rx) = NotificationSender::new(local, CipherSuite::Ctr);

        sender
            .set_beacon_keys(vec![recipient.public().clone()], Duration::from_secs(3600))
            .unwrap();

        assert!(!stream_rx.borrow().is_empty());
        let tables = tables_rx.borrow().clone();
        assert_eq!(tables.id_to_secret.get(BEACON_PSK_ID), Some(&BEACON_KEY));
        assert_eq!(tables.id_to_public_key.len(), 1);

        sender.stop();
    }

    #[tokio::test]
    async fn empty_recipients_publishes_empty_stream_but_keeps_beacon_identity() {
        let local = Arc::new(EcdhKeyPair::generate());
        let (mut sender, stream_rx, tables_rx) = NotificationSender::new(local, CipherSuite::Ctr);
        sender.set_beacon_keys(vec![], Duration::from_secs(60)).unwrap();
        assert!(stream_rx.borrow().is_empty());
        assert!(tables_rx.borrow().id_to_secret.contains_key(BEACON_PSK_ID));
        sender.stop();
    }
}
