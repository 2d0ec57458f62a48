//! # Ledger State
//!
//! The vault's books: what is escrowed, who has been paid how much, and who
//! the issuer is. The ledger enforces its own arithmetic invariants but
//! knows nothing about signatures or callers; those belong to
//! [`crate::vault::Vault`].
//!
//! Invariants, true after every public method returns:
//!
//! - `total_paid_out == paid_out.values().sum()`
//! - `paid_out[b]` never decreases
//! - no balance is ever negative (all amounts are `u64` with checked math)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chequebook_protocol::identity::AccountId;

/// Amounts are whole smallest units. No decimals, no floats.
pub type Amount = u64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by ledger mutations. A failed mutation leaves the ledger
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Attempted to debit more than the escrowed balance.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    /// A credit would push the balance past `u64::MAX`.
    #[error("balance overflow: current {current}, credit {credit}")]
    Overflow { current: Amount, credit: Amount },

    /// `record_payout` called with a cumulative amount that does not exceed
    /// the recorded one.
    #[error("non-monotonic payout for {beneficiary}: recorded {recorded}, proposed {proposed}")]
    NonMonotonicPayout {
        beneficiary: AccountId,
        recorded: Amount,
        proposed: Amount,
    },

    /// The running total of payouts would overflow.
    #[error("total paid out overflow")]
    PaidOutOverflow,

    /// A restored ledger whose totals do not add up.
    #[error("ledger inconsistent: total paid out {total} but payouts sum to {sum}")]
    Inconsistent { total: Amount, sum: u128 },
}

// ---------------------------------------------------------------------------
// LedgerState
// ---------------------------------------------------------------------------

/// Balance accounting for a single vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    issuer: AccountId,
    total_balance: Amount,
    paid_out: BTreeMap<AccountId, Amount>,
    total_paid_out: Amount,
}

/// Values captured before a staged mutation so it can be undone.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    total_balance: Amount,
    total_paid_out: Amount,
    payout: Option<(AccountId, Option<Amount>)>,
}

impl LedgerState {
    /// A fresh, empty ledger owned by `issuer`.
    pub fn new(issuer: AccountId) -> Self {
        Self {
            issuer,
            total_balance: 0,
            paid_out: BTreeMap::new(),
            total_paid_out: 0,
        }
    }

    /// Rebuild a ledger from stored parts, refusing one whose totals do not
    /// add up.
    pub fn from_parts(
        issuer: AccountId,
        total_balance: Amount,
        paid_out: BTreeMap<AccountId, Amount>,
        total_paid_out: Amount,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            issuer,
            total_balance,
            paid_out,
            total_paid_out,
        };
        ledger.check_invariants()?;
        Ok(ledger)
    }

    pub fn issuer(&self) -> &AccountId {
        &self.issuer
    }

    pub fn total_balance(&self) -> Amount {
        self.total_balance
    }

    /// Highest cumulative amount redeemed by `beneficiary`; 0 if never seen.
    pub fn paid_out(&self, beneficiary: &AccountId) -> Amount {
        self.paid_out.get(beneficiary).copied().unwrap_or(0)
    }

    pub fn total_paid_out(&self) -> Amount {
        self.total_paid_out
    }

    /// All beneficiaries with a recorded payout, in key order.
    pub fn beneficiaries(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.paid_out.iter().map(|(id, amount)| (id, *amount))
    }

    /// Increase the escrowed balance. Returns the new balance.
    pub fn credit(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        self.total_balance = self
            .total_balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow {
                current: self.total_balance,
                credit: amount,
            })?;
        Ok(self.total_balance)
    }

    /// Decrease the escrowed balance. Returns the new balance.
    pub fn debit(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        self.total_balance =
            self.total_balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    available: self.total_balance,
                    requested: amount,
                })?;
        Ok(self.total_balance)
    }

    /// Advance `beneficiary`'s cumulative payout to `new_cumulative` and grow
    /// `total_paid_out` by the difference. Returns the difference (the delta).
    ///
    /// # Errors
    ///
    /// [`LedgerError::NonMonotonicPayout`] unless `new_cumulative` is strictly
    /// greater than the recorded value.
    pub fn record_payout(
        &mut self,
        beneficiary: AccountId,
        new_cumulative: Amount,
    ) -> Result<Amount, LedgerError> {
        let recorded = self.paid_out(&beneficiary);
        if new_cumulative <= recorded {
            return Err(LedgerError::NonMonotonicPayout {
                beneficiary,
                recorded,
                proposed: new_cumulative,
            });
        }

        let delta = new_cumulative - recorded;
        let total = self
            .total_paid_out
            .checked_add(delta)
            .ok_or(LedgerError::PaidOutOverflow)?;

        self.paid_out.insert(beneficiary, new_cumulative);
        self.total_paid_out = total;
        Ok(delta)
    }

    /// Capture everything a single vault operation may touch.
    pub fn checkpoint(&self, beneficiary: Option<&AccountId>) -> Checkpoint {
        Checkpoint {
            total_balance: self.total_balance,
            total_paid_out: self.total_paid_out,
            payout: beneficiary.map(|b| (*b, self.paid_out.get(b).copied())),
        }
    }

    /// Roll back to `checkpoint`.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.total_balance = checkpoint.total_balance;
        self.total_paid_out = checkpoint.total_paid_out;
        match checkpoint.payout {
            Some((beneficiary, Some(amount))) => {
                self.paid_out.insert(beneficiary, amount);
            }
            Some((beneficiary, None)) => {
                self.paid_out.remove(&beneficiary);
            }
            None => {}
        }
    }

    /// Check `total_paid_out == sum(paid_out)`. Used when a ledger comes back
    /// from storage.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let sum: u128 = self.paid_out.values().map(|v| *v as u128).sum();
        if sum != self.total_paid_out as u128 {
            return Err(LedgerError::Inconsistent {
                total: self.total_paid_out,
                sum,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> AccountId {
        AccountId::from_bytes([byte; 32])
    }

    #[test]
    fn fresh_ledger_is_empty() {
        let ledger = LedgerState::new(account(1));
        assert_eq!(ledger.issuer(), &account(1));
        assert_eq!(ledger.total_balance(), 0);
        assert_eq!(ledger.total_paid_out(), 0);
        assert_eq!(ledger.paid_out(&account(2)), 0);
        assert!(ledger.check_invariants().is_ok());
    }

    #[test]
    fn credit_and_debit() {
        let mut ledger = LedgerState::new(account(1));
        assert_eq!(ledger.credit(100).unwrap(), 100);
        assert_eq!(ledger.credit(0).unwrap(), 100);
        assert_eq!(ledger.debit(60).unwrap(), 40);
        assert_eq!(ledger.debit(40).unwrap(), 0);
    }

    #[test]
    fn overdraw_rejected_without_change() {
        let mut ledger = LedgerState::new(account(1));
        ledger.credit(10).unwrap();
        assert_eq!(
            ledger.debit(11),
            Err(LedgerError::InsufficientBalance {
                available: 10,
                requested: 11
            })
        );
        assert_eq!(ledger.total_balance(), 10);
    }

    #[test]
    fn credit_overflow_rejected_without_change() {
        let mut ledger = LedgerState::new(account(1));
        ledger.credit(u64::MAX).unwrap();
        assert!(matches!(ledger.credit(1), Err(LedgerError::Overflow { .. })));
        assert_eq!(ledger.total_balance(), u64::MAX);
    }

    #[test]
    fn record_payout_tracks_deltas() {
        let mut ledger = LedgerState::new(account(1));
        assert_eq!(ledger.record_payout(account(2), 500).unwrap(), 500);
        assert_eq!(ledger.record_payout(account(2), 1000).unwrap(), 500);
        assert_eq!(ledger.record_payout(account(3), 70).unwrap(), 70);
        assert_eq!(ledger.paid_out(&account(2)), 1000);
        assert_eq!(ledger.total_paid_out(), 1070);
        assert!(ledger.check_invariants().is_ok());
    }

    #[test]
    fn record_payout_refuses_equal_or_lower() {
        let mut ledger = LedgerState::new(account(1));
        ledger.record_payout(account(2), 500).unwrap();
        for proposed in [0, 499, 500] {
            assert!(matches!(
                ledger.record_payout(account(2), proposed),
                Err(LedgerError::NonMonotonicPayout { recorded: 500, .. })
            ));
        }
        assert_eq!(ledger.total_paid_out(), 500);
    }

    #[test]
    fn restore_undoes_new_and_existing_entries() {
        let mut ledger = LedgerState::new(account(1));
        ledger.credit(1000).unwrap();
        ledger.record_payout(account(2), 100).unwrap();
        let before = ledger.clone();

        let cp = ledger.checkpoint(Some(&account(2)));
        ledger.record_payout(account(2), 300).unwrap();
        ledger.debit(200).unwrap();
        ledger.restore(cp);
        assert_eq!(ledger, before);

        let cp = ledger.checkpoint(Some(&account(3)));
        ledger.record_payout(account(3), 50).unwrap();
        ledger.debit(50).unwrap();
        ledger.restore(cp);
        assert_eq!(ledger, before);
        assert_eq!(ledger.beneficiaries().count(), 1);
    }

    #[test]
    fn inconsistent_snapshot_detected() {
        let mut paid_out = serde_json::Map::new();
        paid_out.insert(account(2).to_address(), serde_json::json!(10));
        let json = serde_json::json!({
            "issuer": account(1).to_address(),
            "total_balance": 0,
            "paid_out": paid_out,
            "total_paid_out": 11,
        });
        let ledger: LedgerState = serde_json::from_value(json).unwrap();
        assert!(matches!(
            ledger.check_invariants(),
            Err(LedgerError::Inconsistent { total: 11, sum: 10 })
        ));
    }
}
