//! PIN hashing and request signing.
//!
//! PINs are never stored in clear: the store keeps
//! `HMAC-SHA256(pepper, account_id || 0x00 || pin)`, hex-encoded. All
//! comparisons are constant-time.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::pin::PinCandidate;

type HmacSha256 = Hmac<Sha256>;

/// Derives and checks stored PIN hashes with a server-side pepper.
#[derive(Clone)]
pub struct PinHasher {
    pepper: Vec<u8>,
}

impl PinHasher {
    pub fn new(pepper: impl Into<Vec<u8>>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    fn mac_for(&self, account_id: &str, pin: &PinCandidate) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.pepper).expect("HMAC accepts any key length");
        mac.update(account_id.as_bytes());
        mac.update(&[0u8]);
        mac.update(pin.expose().as_bytes());
        mac
    }

    /// Hex-encoded hash to persist for `account_id`.
    pub fn hash(&self, account_id: &str, pin: &PinCandidate) -> String {
        hex::encode(self.mac_for(account_id, pin).finalize().into_bytes())
    }

    /// Check a candidate against a stored hash.
    ///
    /// A stored value that is not valid hex is compared against zeros so the
    /// timing does not depend on it.
    pub fn verify(&self, account_id: &str, pin: &PinCandidate, stored: &str) -> bool {
        let expected = hex::decode(stored).unwrap_or_else(|_| vec![0u8; 32]);
        self.mac_for(account_id, pin).verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for PinHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinHasher")
            .field("pepper", &"[REDACTED]")
            .finish()
    }
}

/// HMAC-SHA256 over a request or webhook body, hex-encoded.
pub fn sign_body(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a body signature produced by [`sign_body`].
pub fn verify_body(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time comparison that leaks neither content nor length.
///
/// Both sides are hashed to fixed-size digests before comparing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}
