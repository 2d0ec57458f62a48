//! # Identity Module
//!
//! Two kinds of identity matter to a vault:
//!
//! 1. **Accounts**: issuers, beneficiaries, recipients and API callers.
//!    An [`AccountId`] is an Ed25519 public key rendered as a `chq1…`
//!    Bech32 address.
//! 2. **Vaults**: a [`VaultId`] names one deployment and is mixed into
//!    every cheque so signatures cannot be replayed across vaults.

pub mod account;
pub mod vault_id;

pub use account::{AccountId, AccountIdError};
pub use vault_id::{VaultId, VaultIdParseError};
