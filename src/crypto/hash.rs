//! SHA-256 hashing
//!
//! Every hash on the network is the SHA-256 digest of a canonical textual
//! rendering, printed as lowercase hex. The rendering is part of the wire
//! contract: two nodes that disagree on a single byte of it can never
//! agree on a chain.

use sha2::{Digest, Sha256};

/// Hash a canonical rendering with SHA-256 and return lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Proof-of-work predicate: the hex digest must start with `threshold`
/// ASCII `'0'` characters. A non-positive threshold accepts any digest.
pub fn satisfies_difficulty(digest: &str, threshold: i64) -> bool {
    if threshold <= 0 {
        return true;
    }
    let required = threshold as usize;
    digest.len() >= required && digest.as_bytes()[..required].iter().all(|&b| b == b'0')
}
