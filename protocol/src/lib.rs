// Copyright (c) 2026 Chequebook Developers. MIT License.
// See LICENSE for details.

//! # Chequebook Protocol: Core Primitives
//!
//! The leaf layer of the Chequebook vault. Everything the vault engine needs
//! to decide whether a cheque is genuine lives here; everything it needs to
//! decide whether a cheque is *payable* lives in `chequebook-contracts`.
//!
//! ## Modules
//!
//! - **crypto**: Ed25519 keys, strict signature verification, BLAKE3 hashing.
//! - **identity**: account identities (`chq1…` Bech32 addresses) and vault
//!   identities used to tag signed messages.
//! - **config**: protocol constants: domain tags, encoding versions, sizes,
//!   default ports.
//!
//! ## Ground rules
//!
//! 1. Verification never panics on attacker-supplied bytes. Garbage in,
//!    `false` out.
//! 2. One signature encoding per (key, message). Malleable forms are rejected.
//! 3. No key material in logs, `Debug` output, or error messages.

pub mod config;
pub mod crypto;
pub mod identity;
