//! Hashing utilities for version tracking

use sha2::{Digest, Sha256};
use std::path::Path;

/// Length of the shortened version hash
const VERSION_HASH_LEN: usize = 16;

/// Hex-encoded SHA-256 of the given bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Short, stable hash identifying a revision of a task definition
pub fn version_hash(content: &[u8]) -> String {
    let mut hex = sha256_hex(content);
    hex.truncate(VERSION_HASH_LEN);
    hex
}

/// Version hash of a file on disk; `None` if it cannot be read
pub fn version_hash_file(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|content| version_hash(&content))
}
