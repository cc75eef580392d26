//! C1 BeaconCodec: ECDH/HKDF/HMAC notification beacons (§4.1).

mod cipher;
mod codec;
mod types;

pub use cipher::{cipher_for, Aes128CtrCipher, Aes128GcmCipher, BeaconCipher, CipherSuite};
pub use codec::{generate, parse};
pub use types::{Beacon, EcdhKeyPair, KeyHash, Preamble, PublicKey};
