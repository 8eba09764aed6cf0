//! Integrity: SHA-256 over each frame body, verified on receive.

use sha2::{Digest, Sha256};

/// Size of a body checksum.
pub const CHECKSUM_LEN: usize = 32;

/// Hash a frame body. Returns 32-byte digest.
pub fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.finalize().into()
}

/// Verify a body against the checksum carried in its header.
pub fn verify(body: &[u8], expected: &[u8; CHECKSUM_LEN]) -> bool {
    checksum(body) == *expected
}
