// Copyright (c) 2026 Chequebook Developers. MIT License.

//! # Chequebook Vault
//!
//! An escrow ledger for cumulative cheques. An issuer funds a vault and
//! signs cheques off-ledger; each cheque authorizes a beneficiary to have
//! redeemed *in total* a given amount. Cashing a cheque pays only the
//! difference between that total and what the beneficiary already received,
//! so a newer cheque supersedes every older one and replaying an old one
//! pays nothing.
//!
//! - [`cheque`]: the canonical byte encoding an issuer signs.
//! - [`ledger`]: balance and payout bookkeeping with rollback checkpoints.
//! - [`transfer`]: the seam through which value leaves the vault.
//! - [`vault`]: the engine tying signatures, bookkeeping and transfers
//!   together.
//!
//! ## Design Principles
//!
//! 1. All monetary operations use `checked_add`/`checked_sub`. Amounts are
//!    `u64` and can never go negative.
//! 2. A rejected call changes nothing. State is mutated only after every
//!    check passes, and rolled back if the outbound transfer fails.
//! 3. The issuer signature gates every payout, and it is checked against a
//!    cheque rebuilt from the call itself, never against caller-supplied
//!    bytes.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod cheque;
pub mod ledger;
pub mod transfer;
pub mod vault;

pub use cheque::{canonical_bytes, Cheque};
pub use ledger::{Amount, Checkpoint, LedgerError, LedgerState};
pub use transfer::{AccountBook, TransferError, ValueTransfer};
pub use vault::{CallContext, Vault, VaultError, VaultEvent, VaultSnapshot};
