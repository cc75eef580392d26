//! Core beacon data types (§3): keys, key hashes, and the beacon/stream
//! byte layouts.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{Result, ThaliError};

/// An uncompressed secp256k1 point, 65 bytes (`0x04 || x || y`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 65]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(ThaliError::MalformedPreamble(format!(
                "expected 65-byte public key, got {}",
                bytes.len()
            )));
        }
        // Validate it is actually a point on the curve.
        K256PublicKey::from_sec1_bytes(bytes)
            .map_err(|e| ThaliError::MalformedPreamble(format!("invalid public key: {e}")))?;
        let mut buf = [0u8; 65];
        buf.copy_from_slice(bytes);
        Ok(PublicKey(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    fn to_k256(&self) -> K256PublicKey {
        K256PublicKey::from_sec1_bytes(&self.0).expect("validated at construction")
    }

    /// First 16 bytes of SHA-256(self) — the identity surface used
    /// throughout the beacon codec and the PSK/ACL layer.
    pub fn hash(&self) -> KeyHash {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        KeyHash(out)
    }
}

/// First 16 bytes of `SHA256(PublicKey)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash(pub [u8; 16]);

impl KeyHash {
    pub fn to_base64(self) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD.encode(self.0)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A local ECDH identity: a secp256k1 keypair used for both decrypting
/// beacons addressed to us and signing the ones we send.
pub struct EcdhKeyPair {
    secret: K256SecretKey,
    public: PublicKey,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = K256SecretKey::random(&mut OsRng);
        let public = encode_public(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &K256SecretKey {
        &self.secret
    }

    /// Raw x-coordinate ECDH shared secret with `peer`.
    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> [u8; 32] {
        let peer_point = peer.to_k256();
        let shared = k256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer_point.as_affine(),
        );
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}

fn encode_public(secret: &K256SecretKey) -> PublicKey {
    let point = secret.public_key().to_encoded_point(false);
    let mut buf = [0u8; 65];
    buf.copy_from_slice(point.as_bytes());
    PublicKey(buf)
}

/// A single 48-byte beacon: 32 bytes ciphertext (key-id block, see
/// `SPEC_FULL.md` §3.1) followed by a 16-byte truncated HMAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub ciphertext: [u8; 32],
    pub hmac: [u8; 16],
}

impl Beacon {
    pub const LEN: usize = 48;

    pub fn to_bytes(&self) -> [u8; 48] {
        let mut out = [0u8; 48];
        out[..32].copy_from_slice(&self.ciphertext);
        out[32..].copy_from_slice(&self.hmac);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), 48);
        let mut ciphertext = [0u8; 32];
        let mut hmac = [0u8; 16];
        ciphertext.copy_from_slice(&bytes[..32]);
        hmac.copy_from_slice(&bytes[32..]);
        Beacon { ciphertext, hmac }
    }
}

/// The wire layout of a full notification: `Preamble(73) || Beacon*`.
pub struct Preamble {
    pub ephemeral_public: PublicKey,
    pub expiration_seconds: i64,
}

impl Preamble {
    pub const LEN: usize = 73;

    pub fn to_bytes(&self) -> [u8; 73] {
        let mut out = [0u8; 73];
        out[..65].copy_from_slice(self.ephemeral_public.as_bytes());
        out[65..].copy_from_slice(&self.expiration_seconds.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(ThaliError::MalformedPreamble(format!(
                "expected {}-byte preamble, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let ephemeral_public = PublicKey::from_bytes(&bytes[..65])?;
        let mut exp_buf = [0u8; 8];
        exp_buf.copy_from_slice(&bytes[65..73]);
        let expiration_seconds = i64::from_be_bytes(exp_buf);
        if !(0..=86_400).contains(&expiration_seconds) {
            return Err(ThaliError::MalformedPreamble(format!(
                "expiration {expiration_seconds} out of [0, 86400] range"
            )));
        }
        Ok(Preamble {
            ephemeral_public,
            expiration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_16_bytes_of_sha256() {
        let kp = EcdhKeyPair::generate();
        let hash = kp.public().hash();
        let expected = Sha256::digest(kp.public().as_bytes());
        assert_eq!(&hash.0, &expected[..16]);
    }

    #[test]
    fn preamble_round_trips() {
        let kp = EcdhKeyPair::generate();
        let preamble = Preamble {
            ephemeral_public: kp.public().clone(),
            expiration_seconds: 3600,
        };
        let bytes = preamble.to_bytes();
        let parsed = Preamble::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ephemeral_public, preamble.ephemeral_public);
        assert_eq!(parsed.expiration_seconds, 3600);
    }

    #[test]
    fn preamble_rejects_out_of_range_expiration() {
        let kp = EcdhKeyPair::generate();
        let mut bytes = [0u8; 73];
        bytes[..65].copy_from_slice(kp.public().as_bytes());
        bytes[65..].copy_from_slice(&90_000i64.to_be_bytes());
        assert!(Preamble::from_bytes(&bytes).is_err());
    }

    #[test]
    fn diffie_hellman_is_symmetric() {
        let a = EcdhKeyPair::generate();
        let b = EcdhKeyPair::generate();
        assert_eq!(a.diffie_hellman(b.public()), b.diffie_hellman(a.public()));
    }
}
