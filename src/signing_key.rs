//! SigV4 signing key derivation and caching
//!
//! The chained key `HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region),
//! service), "aws4_request")` is valid for a whole day, so deriving it
//! per request wastes four HMAC invocations. The cache keeps recently
//! used keys, identified by a fingerprint of the secret rather than the
//! secret itself.

use crate::signature_v4::derive_signing_key;
use crate::utils::crypto;

use smallvec::SmallVec;
use zeroize::ZeroizeOnDrop;

/// hard cap on cached keys
const CACHE_CAP: usize = 16;

/// A derived 32-byte signing key. Zeroed on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKey {
    /// key bytes
    bytes: [u8; 32],
}

impl SigningKey {
    /// key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// cache key: the secret never enters the table, only its fingerprint
#[derive(Debug, PartialEq, Eq)]
struct CacheKey {
    /// sha256 of the secret key
    secret_fingerprint: [u8; 32],
    /// `YYYYMMDD`
    date: String,
    /// region
    region: String,
    /// service
    service: String,
}

/// LRU cache over derived signing keys.
///
/// Lookups with identical `(secret, date, region, service)` return
/// identical bytes; eviction drops the `SigningKey`, which zeroes its
/// bytes before the memory is released.
#[derive(Debug, Default)]
pub struct SigningKeyCache {
    /// most-recently-used first
    entries: SmallVec<[(CacheKey, SigningKey); CACHE_CAP]>,
}

impl SigningKeyCache {
    /// Constructs an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the signing key for the scope, deriving it on a miss.
    pub fn lookup(
        &mut self,
        secret_key: &str,
        date: &str,
        region: &str,
        service: &str,
    ) -> SigningKey {
        let key = CacheKey {
            secret_fingerprint: crypto::sha256(secret_key.as_bytes()),
            date: date.to_owned(),
            region: region.to_owned(),
            service: service.to_owned(),
        };

        if let Some(idx) = self.entries.iter().position(|&(ref k, _)| *k == key) {
            let entry = self.entries.remove(idx);
            let ans = entry.1.clone();
            self.entries.insert(0, entry);
            return ans;
        }

        let derived = SigningKey {
            bytes: derive_signing_key(secret_key, date, region, service),
        };
        self.entries.insert(0, (key, derived.clone()));
        self.entries.truncate(CACHE_CAP);
        derived
    }

    /// number of cached keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// true when nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
