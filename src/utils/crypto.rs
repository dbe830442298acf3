//! crypto utils

use crate::utils::Also;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// convert bytes to lowercase hex string
pub fn to_hex_string(src: impl AsRef<[u8]>) -> String {
    faster_hex::hex_string(src.as_ref())
}

/// `hex(sha256(data))`
pub fn hex_sha256(data: &[u8]) -> String {
    let src = Sha256::digest(data);

    #[cfg(test)]
    debug_assert!(src.as_slice().len() == 32);

    to_hex_string(src)
}

/// `sha256(data)` as raw bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// `hmac_sha256(key, data)`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let m = <Hmac<Sha256>>::new_from_slice(key)
        .unwrap_or_else(|_| panic!("HMAC can take key of any size"));
    m.also(|m| m.update(data)).finalize().into_bytes().into()
}

/// `hex(hmac_sha256(key, data))`
pub fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    to_hex_string(hmac_sha256(key, data))
}
