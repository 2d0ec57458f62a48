//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function in the vault. Signatures are taken over
//! full canonical messages (Ed25519 hashes internally with SHA-512), so
//! hashes here serve identity derivation, envelope digests and log
//! correlation.
//!
//! Domain separation uses BLAKE3's `derive_key` mode rather than a manually
//! prepended tag; each context string gets its own IV.

/// Compute the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated hash. Two different contexts never collide, even over
/// identical data.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Domain-separated hash over several slices fed in order, without
/// concatenating them first. Callers must only pass fixed-width parts, or
/// the boundaries between parts become ambiguous.
pub fn domain_separated_hash_multi(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
