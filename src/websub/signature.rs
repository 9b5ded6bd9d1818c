//! HMAC signing and verification of hub notifications.
//!
//! Hubs sign the raw notification body with the subscription secret and send
//! the result as `X-Hub-Signature: <alg>=<hex>`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Header carrying the notification signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Secret length in bytes (256 bits).
pub const SECRET_BYTES: usize = 32;

/// Digest algorithms a hub may sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Parse the `<alg>` prefix of a signature header.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Header prefix for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// Result of checking a notification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// The header was absent.
    Missing,
    /// The signature matches the body.
    Valid,
    /// Wrong digest, unknown algorithm or malformed header.
    Mismatch,
}

/// Generate a fresh subscription secret: 256 random bits, hex-encoded.
pub fn generate_secret() -> String {
    let bytes: [u8; SECRET_BYTES] = rand::random();
    hex::encode(bytes)
}

fn mac_bytes(alg: SignatureAlgorithm, secret: &[u8], body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    macro_rules! digest {
        ($hash:ty) => {
            match Hmac::<$hash>::new_from_slice(secret) {
                Ok(mut mac) => {
                    mac.update(body);
                    mac.finalize().into_bytes().to_vec()
                }
                Err(_) => Vec::new(),
            }
        };
    }

    match alg {
        SignatureAlgorithm::Sha1 => digest!(Sha1),
        SignatureAlgorithm::Sha256 => digest!(Sha256),
        SignatureAlgorithm::Sha384 => digest!(Sha384),
        SignatureAlgorithm::Sha512 => digest!(Sha512),
    }
}

/// Compute the signature header value for `body`.
pub fn sign(alg: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    format!(
        "{}={}",
        alg.as_str(),
        hex::encode(mac_bytes(alg, secret.as_bytes(), body))
    )
}

/// Check a signature header against the raw body.
///
/// Digests are compared in constant time.
pub fn verify_signature(header: Option<&str>, secret: &str, body: &[u8]) -> SignatureCheck {
    let Some(header) = header else {
        return SignatureCheck::Missing;
    };

    let Some((alg, hex_digest)) = header.trim().split_once('=') else {
        return SignatureCheck::Mismatch;
    };
    let Some(alg) = SignatureAlgorithm::parse(alg) else {
        return SignatureCheck::Mismatch;
    };
    let Ok(provided) = hex::decode(hex_digest.trim()) else {
        return SignatureCheck::Mismatch;
    };

    let expected = mac_bytes(alg, secret.as_bytes(), body);
    if expected.is_empty() || expected.len() != provided.len() {
        return SignatureCheck::Mismatch;
    }

    if bool::from(expected.ct_eq(&provided)) {
        SignatureCheck::Valid
    } else {
        SignatureCheck::Mismatch
    }
}
