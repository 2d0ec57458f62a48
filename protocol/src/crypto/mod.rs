//! # Cryptographic Primitives
//!
//! Everything security-related in the vault flows through here:
//!
//! - **Ed25519** for issuer cheque signatures and caller envelopes.
//! - **BLAKE3** for vault identities and digests.
//!
//! These are thin, type-safe wrappers around audited implementations. If
//! you're tempted to optimize them, don't.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, domain_separated_hash, domain_separated_hash_multi};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
pub use signatures::{sign, verify, SignatureError};
