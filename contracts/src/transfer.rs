//! # Value Transfer
//!
//! The vault decides *whether* value moves; something outside it actually
//! moves it. [`ValueTransfer`] is that seam. Implementations may fail, and
//! the vault undoes its own bookkeeping when they do.
//!
//! [`AccountBook`] is the in-process implementation used by the node and
//! by tests: a map of external account balances that transfers credit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chequebook_protocol::identity::AccountId;

use crate::ledger::Amount;

/// Why a transfer did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The receiving account refuses incoming value.
    #[error("recipient {0} rejected the transfer")]
    Rejected(AccountId),

    /// The receiving balance would overflow.
    #[error("recipient {0} balance overflow")]
    Overflow(AccountId),

    /// The backend could not be reached or refused to act.
    #[error("transfer backend unavailable: {0}")]
    Unavailable(String),
}

/// Moves value out of the vault to an account.
///
/// Must either move exactly `amount` to `to` and return `Ok`, or move
/// nothing and return `Err`.
pub trait ValueTransfer {
    fn transfer(&mut self, to: &AccountId, amount: Amount) -> Result<(), TransferError>;
}

/// External account balances, credited by vault payouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBook {
    balances: BTreeMap<AccountId, Amount>,
    #[serde(default)]
    rejecting: BTreeSet<AccountId>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance held by `account`; 0 if unknown.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Make every future transfer to `account` fail.
    pub fn reject_incoming(&mut self, account: AccountId) {
        self.rejecting.insert(account);
    }

    /// Undo [`reject_incoming`](Self::reject_incoming).
    pub fn accept_incoming(&mut self, account: &AccountId) {
        self.rejecting.remove(account);
    }

    /// All accounts with a non-zero history, in key order.
    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.balances.iter().map(|(id, amount)| (id, *amount))
    }

    /// Sum of all balances.
    pub fn total(&self) -> u128 {
        self.balances.values().map(|v| *v as u128).sum()
    }
}

impl FromIterator<(AccountId, Amount)> for AccountBook {
    fn from_iter<I: IntoIterator<Item = (AccountId, Amount)>>(iter: I) -> Self {
        Self {
            balances: iter.into_iter().collect(),
            rejecting: BTreeSet::new(),
        }
    }
}

impl ValueTransfer for AccountBook {
    fn transfer(&mut self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if self.rejecting.contains(to) {
            return Err(TransferError::Rejected(*to));
        }
        let current = self.balance_of(to);
        let updated = current
            .checked_add(amount)
            .ok_or(TransferError::Overflow(*to))?;
        self.balances.insert(*to, updated);
        Ok(())
    }
}
