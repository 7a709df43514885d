//! Utilities

pub mod hash;

pub use hash::{sha256_hex, version_hash, version_hash_file};
