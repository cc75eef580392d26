//! `generate`/`parse` for the notification-beacon wire format (§4.1).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Result, ThaliError};

use super::cipher::{cipher_for, CipherSuite};
use super::types::{Beacon, EcdhKeyPair, KeyHash, Preamble, PublicKey};

type HmacSha256 = Hmac<Sha256>;

fn hkdf_expand_32(secret: &[u8; 32], salt: &[u8; 8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut okm = [0u8; 32];
    hk.expand(&[], &mut okm)
        .expect("32 is a valid HKDF-SHA256 output length");
    okm
}

fn hmac_truncated(key: &[u8; 32], message: &[u8; 8]) -> [u8; 16] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// Build a beacon stream announcing availability to `recipients`.
///
/// Returns an empty `Vec` when `recipients` is empty (per §4.1: a non-null
/// but possibly-empty key list is valid input, not an error).
pub fn generate(
    recipients: &[PublicKey],
    local: &EcdhKeyPair,
    seconds_until_expiration: i64,
    suite: CipherSuite,
) -> Result<Vec<u8>> {
    if !(0..=86_400).contains(&seconds_until_expiration) {
        return Err(ThaliError::ArgumentRange(format!(
            "secondsUntilExpiration {seconds_until_expiration} out of [0, 86400]"
        )));
    }
    if recipients.is_empty() {
        return Ok(Vec::new());
    }

    let ephemeral = EcdhKeyPair::generate();
    let unencrypted_key_id = local.public().hash();
    let expiration_be = seconds_until_expiration.to_be_bytes();

    let preamble = Preamble {
        ephemeral_public: ephemeral.public().clone(),
        expiration_seconds: seconds_until_expiration,
    };

    let cipher = cipher_for(suite);
    let mut out = Vec::with_capacity(Preamble::LEN + recipients.len() * Beacon::LEN);
    out.extend_from_slice(&preamble.to_bytes());

    for recipient in recipients {
        let sxy = local.diffie_hellman(recipient);
        let hkxy = hkdf_expand_32(&sxy, &expiration_be);
        let beacon_hmac = hmac_truncated(&hkxy, &expiration_be);

        let sey = ephemeral.diffie_hellman(recipient);
        let km = hkdf_expand_32(&sey, &expiration_be);
        let mut iv = [0u8; 16];
        let mut hkey = [0u8; 16];
        iv.copy_from_slice(&km[..16]);
        hkey.copy_from_slice(&km[16..]);

        let ciphertext = cipher.seal(&hkey, &iv, &unencrypted_key_id.0);
        let beacon = Beacon {
            ciphertext,
            hmac: beacon_hmac,
        };
        out.extend_from_slice(&beacon.to_bytes());
    }

    Ok(out)
}

/// Recover the key hash of whichever recipient this stream was addressed
/// to, or `None` if none of `address_book`'s entries match.
///
/// `address_book` maps a candidate key hash to the full public key needed
/// to verify the companion HMAC; it returns `None` for unknown hashes.
pub fn parse(
    stream: &[u8],
    local: &EcdhKeyPair,
    suite: CipherSuite,
    address_book: impl Fn(&KeyHash) -> Option<PublicKey>,
) -> Result<Option<KeyHash>> {
    if stream.len() < Preamble::LEN || (stream.len() - Preamble::LEN) % Beacon::LEN != 0 {
        return Err(ThaliError::MalformedPreamble(format!(
            "stream length {} is not {}+48k",
            stream.len(),
            Preamble::LEN
        )));
    }

    let preamble = Preamble::from_bytes(&stream[..Preamble::LEN])?;
    let expiration_be = preamble.expiration_seconds.to_be_bytes();
    let cipher = cipher_for(suite);

    let body = &stream[Preamble::LEN..];
    for chunk in body.chunks_exact(Beacon::LEN) {
        let beacon = Beacon::from_bytes(chunk);

        let sey = local.diffie_hellman(&preamble.ephemeral_public);
        let km = hkdf_expand_32(&sey, &expiration_be);
        let mut iv = [0u8; 16];
        let mut hkey = [0u8; 16];
        iv.copy_from_slice(&km[..16]);
        hkey.copy_from_slice(&km[16..]);

        let Some(candidate) = cipher.open(&hkey, &iv, &beacon.ciphertext) else {
            continue;
        };
        let candidate_hash = KeyHash(candidate);

        let Some(sender_public) = address_book(&candidate_hash) else {
            continue;
        };

        let sxy = local.diffie_hellman(&sender_public);
        let hkxy = hkdf_expand_32(&sxy, &expiration_be);
        let expected_hmac = hmac_truncated(&hkxy, &expiration_be);

        if expected_hmac.ct_eq(&beacon.hmac).into() {
            return Ok(Some(candidate_hash));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_book_for(keys: &[PublicKey]) -> impl Fn(&KeyHash) -> Option<PublicKey> + '_ {
        move |hash: &KeyHash| keys.iter().find(|k| k.hash() == *hash).cloned()
    }

    #[test]
    fn happy_path_round_trips() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();

        let stream = generate(&[bob.public().clone()], &alice, 3600, CipherSuite::Ctr).unwrap();
        let addr_book = address_book_for(std::slice::from_ref(alice.public()));
        let found = parse(&stream, &bob, CipherSuite::Ctr, addr_book).unwrap();
        assert_eq!(found, Some(alice.public().hash()));
    }

    #[test]
    fn empty_address_book_returns_none() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let stream = generate(&[bob.public().clone()], &alice, 3600, CipherSuite::Ctr).unwrap();
        let found = parse(&stream, &bob, CipherSuite::Ctr, |_| None).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn wrong_recipient_returns_none() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let carol = EcdhKeyPair::generate();

        let stream = generate(&[carol.public().clone()], &alice, 3600, CipherSuite::Ctr).unwrap();
        let addr_book = address_book_for(std::slice::from_ref(alice.public()));
        let found = parse(&stream, &bob, CipherSuite::Ctr, addr_book).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn empty_recipients_produces_empty_stream() {
        let alice = EcdhKeyPair::generate();
        let stream = generate(&[], &alice, 3600, CipherSuite::Ctr).unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn out_of_range_expiration_is_argument_range_error() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let err = generate(&[bob.public().clone()], &alice, 90_000, CipherSuite::Ctr).unwrap_err();
        assert!(matches!(err, ThaliError::ArgumentRange(_)));
    }

    #[test]
    fn malformed_length_is_rejected() {
        let bob = EcdhKeyPair::generate();
        let bad = vec![0u8; Preamble::LEN + 10];
        let err = parse(&bad, &bob, CipherSuite::Ctr, |_| None).unwrap_err();
        assert!(matches!(err, ThaliError::MalformedPreamble(_)));
    }

    #[test]
    fn gcm_suite_round_trips() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let stream = generate(&[bob.public().clone()], &alice, 60, CipherSuite::Gcm).unwrap();
        let addr_book = address_book_for(std::slice::from_ref(alice.public()));
        let found = parse(&stream, &bob, CipherSuite::Gcm, addr_book).unwrap();
        assert_eq!(found, Some(alice.public().hash()));
    }

    #[test]
    fn first_match_wins_among_multiple_recipients() {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let carol = EcdhKeyPair::generate();

        let stream = generate(
            &[bob.public().clone(), carol.public().clone()],
            &alice,
            120,
            CipherSuite::Ctr,
        )
        .unwrap();
        let addr_book = address_book_for(std::slice::from_ref(alice.public()));
        let found = parse(&stream, &bob, CipherSuite::Ctr, &addr_book).unwrap();
        assert_eq!(found, Some(alice.public().hash()));
        let found_for_carol = parse(&stream, &carol, CipherSuite::Ctr, &addr_book).unwrap();
        assert_eq!(found_for_carol, Some(alice.public().hash()));
    }
}
