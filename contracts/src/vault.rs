//! # Vault Engine
//!
//! The state machine that turns signed cheques into payouts. Three mutating
//! operations ([`deposit`](Vault::deposit),
//! [`cash_cheque_beneficiary`](Vault::cash_cheque_beneficiary),
//! [`withdraw`](Vault::withdraw)) and three queries.
//!
//! Every mutating operation runs in three phases:
//!
//! 1. **Check**: every precondition, in a fixed order, with no mutation.
//! 2. **Effect**: ledger mutations, under a [`Checkpoint`](crate::ledger::Checkpoint).
//! 3. **Interaction**: the outbound [`ValueTransfer`], last.
//!
//! If phase 2 or 3 fails the checkpoint is restored, so a failed call leaves
//! no trace. Because the engine holds `&mut self` for the whole call, a
//! transfer backend cannot re-enter the vault halfway through.
//!
//! Cheque redemption checks the issuer signature before anything that
//! depends on ledger state, so a forged cheque learns nothing about balances
//! or prior payouts from the error it gets back.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use chequebook_protocol::crypto::Signature;
use chequebook_protocol::identity::{AccountId, VaultId};

use crate::cheque::Cheque;
use crate::ledger::{Amount, LedgerError, LedgerState};
use crate::transfer::{TransferError, ValueTransfer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a vault operation was rejected. Every variant means the whole call
/// was reverted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// Value was attached to an operation that forbids it.
    #[error("unexpected value attached: {value}")]
    UnexpectedValue { value: Amount },

    /// The signature is not the issuer's over the cheque rebuilt from the
    /// call's own parameters.
    #[error("invalid issuer signature")]
    InvalidIssuerSignature,

    /// The cheque does not exceed what the beneficiary already redeemed.
    #[error("Vault: cannot cash")]
    CannotCash {
        paid_out: Amount,
        cumulative_payout: Amount,
    },

    /// The newly payable delta exceeds the escrowed balance.
    #[error("Vault: insufficient balance: owed {delta}, available {available}")]
    InsufficientBalance { delta: Amount, available: Amount },

    /// Withdraw attempted by someone other than the issuer.
    #[error("not issuer")]
    NotIssuer,

    /// Withdraw amount exceeds the escrowed balance.
    #[error("totalbalance not sufficient: requested {requested}, available {available}")]
    InsufficientTotalBalance { requested: Amount, available: Amount },

    /// The transfer backend failed after all checks passed.
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] TransferError),

    /// A deposit would push the escrowed balance past `u64::MAX`.
    #[error("deposit would overflow the vault balance")]
    BalanceOverflow,

    /// The ledger refused a mutation the engine had already validated.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl VaultError {
    /// Stable identifier for API responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::UnexpectedValue { .. } => "unexpected_value",
            VaultError::InvalidIssuerSignature => "invalid_issuer_signature",
            VaultError::CannotCash { .. } => "cannot_cash",
            VaultError::InsufficientBalance { .. } => "insufficient_balance",
            VaultError::NotIssuer => "not_issuer",
            VaultError::InsufficientTotalBalance { .. } => "insufficient_total_balance",
            VaultError::TransferFailed(_) => "transfer_failed",
            VaultError::BalanceOverflow => "balance_overflow",
            VaultError::Ledger(_) => "ledger",
        }
    }
}

// ---------------------------------------------------------------------------
// Calls and receipts
// ---------------------------------------------------------------------------

/// Who is calling and how much value they attached. Supplied by whatever
/// transport sits in front of the vault; the vault treats both as claims to
/// be checked, never as authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: AccountId,
    pub value: Amount,
}

impl CallContext {
    pub fn new(caller: AccountId, value: Amount) -> Self {
        Self { caller, value }
    }

    /// A call with no value attached.
    pub fn from(caller: AccountId) -> Self {
        Self::new(caller, 0)
    }
}

/// Receipt of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    Deposited {
        from: AccountId,
        amount: Amount,
        total_balance: Amount,
    },
    ChequeCashed {
        beneficiary: AccountId,
        recipient: AccountId,
        cumulative_payout: Amount,
        delta: Amount,
        total_balance: Amount,
        total_paid_out: Amount,
    },
    Withdrawn {
        issuer: AccountId,
        amount: Amount,
        total_balance: Amount,
    },
}

/// Serializable image of a vault, for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub vault_id: VaultId,
    pub ledger: LedgerState,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// One vault instance: an identity plus its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    vault_id: VaultId,
    ledger: LedgerState,
}

impl Vault {
    /// A new, empty vault. `issuer` and `vault_id` never change afterwards.
    pub fn new(issuer: AccountId, vault_id: VaultId) -> Self {
        Self {
            vault_id,
            ledger: LedgerState::new(issuer),
        }
    }

    /// Rebuild from a snapshot, re-checking ledger invariants.
    pub fn from_snapshot(snapshot: VaultSnapshot) -> Result<Self, LedgerError> {
        snapshot.ledger.check_invariants()?;
        Ok(Self {
            vault_id: snapshot.vault_id,
            ledger: snapshot.ledger,
        })
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            vault_id: self.vault_id,
            ledger: self.ledger.clone(),
        }
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn ledger(&self) -> &LedgerState {
        &self.ledger
    }

    // -- queries ------------------------------------------------------------

    /// Highest cumulative amount `beneficiary` has redeemed; 0 if never.
    pub fn paid_out_cheques(&self, beneficiary: &AccountId) -> Amount {
        self.ledger.paid_out(beneficiary)
    }

    /// Sum of all redemptions to date.
    pub fn total_paid_out_cheques(&self) -> Amount {
        self.ledger.total_paid_out()
    }

    pub fn issuer(&self) -> &AccountId {
        self.ledger.issuer()
    }

    pub fn total_balance(&self) -> Amount {
        self.ledger.total_balance()
    }

    // -- operations ---------------------------------------------------------

    /// Accept the value attached to the call. Anyone may deposit; zero is a
    /// successful no-op.
    pub fn deposit(&mut self, ctx: &CallContext) -> Result<VaultEvent, VaultError> {
        let total_balance = self.ledger.credit(ctx.value).map_err(|e| match e {
            LedgerError::Overflow { .. } => VaultError::BalanceOverflow,
            other => VaultError::Ledger(other),
        })?;

        debug!(from = %ctx.caller, amount = ctx.value, total_balance, "deposit accepted");
        Ok(VaultEvent::Deposited {
            from: ctx.caller,
            amount: ctx.value,
            total_balance,
        })
    }

    /// Redeem a cheque for the caller.
    ///
    /// The caller is the beneficiary: the cheque is rebuilt as
    /// `(vault_id, ctx.caller, recipient, cumulative_payout)` and the
    /// signature must be the issuer's over exactly that. Pays
    /// `cumulative_payout - paid_out[caller]` to `recipient`.
    ///
    /// # Errors
    ///
    /// Checked in this order: [`VaultError::UnexpectedValue`],
    /// [`VaultError::InvalidIssuerSignature`], [`VaultError::CannotCash`],
    /// [`VaultError::InsufficientBalance`]; then
    /// [`VaultError::TransferFailed`] if the payout itself fails.
    pub fn cash_cheque_beneficiary<T: ValueTransfer + ?Sized>(
        &mut self,
        ctx: &CallContext,
        recipient: &AccountId,
        cumulative_payout: Amount,
        signature: &Signature,
        transfer: &mut T,
    ) -> Result<VaultEvent, VaultError> {
        ensure_no_value(ctx)?;

        let beneficiary = ctx.caller;
        let cheque = Cheque::new(self.vault_id, beneficiary, *recipient, cumulative_payout);
        if !cheque.is_signed_by(self.ledger.issuer(), signature) {
            warn!(
                beneficiary = %beneficiary,
                cheque = %cheque.short_id(),
                "rejected cheque with invalid issuer signature"
            );
            return Err(VaultError::InvalidIssuerSignature);
        }

        let paid_out = self.ledger.paid_out(&beneficiary);
        if cumulative_payout <= paid_out {
            return Err(VaultError::CannotCash {
                paid_out,
                cumulative_payout,
            });
        }

        let delta = cumulative_payout - paid_out;
        let available = self.ledger.total_balance();
        if delta > available {
            return Err(VaultError::InsufficientBalance { delta, available });
        }

        self.atomically(Some(&beneficiary), |ledger| {
            ledger.record_payout(beneficiary, cumulative_payout)?;
            ledger.debit(delta)?;
            transfer
                .transfer(recipient, delta)
                .map_err(VaultError::TransferFailed)
        })?;

        debug!(
            beneficiary = %beneficiary,
            recipient = %recipient,
            cheque = %cheque.short_id(),
            cumulative_payout,
            delta,
            "cheque cashed"
        );
        Ok(VaultEvent::ChequeCashed {
            beneficiary,
            recipient: *recipient,
            cumulative_payout,
            delta,
            total_balance: self.ledger.total_balance(),
            total_paid_out: self.ledger.total_paid_out(),
        })
    }

    /// Return unobligated balance to the issuer.
    ///
    /// # Errors
    ///
    /// Checked in this order: [`VaultError::UnexpectedValue`],
    /// [`VaultError::NotIssuer`], [`VaultError::InsufficientTotalBalance`];
    /// then [`VaultError::TransferFailed`].
    pub fn withdraw<T: ValueTransfer + ?Sized>(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
        transfer: &mut T,
    ) -> Result<VaultEvent, VaultError> {
        ensure_no_value(ctx)?;

        let issuer = *self.ledger.issuer();
        if ctx.caller != issuer {
            return Err(VaultError::NotIssuer);
        }

        let available = self.ledger.total_balance();
        if amount > available {
            return Err(VaultError::InsufficientTotalBalance {
                requested: amount,
                available,
            });
        }

        self.atomically(None, |ledger| {
            ledger.debit(amount)?;
            transfer
                .transfer(&issuer, amount)
                .map_err(VaultError::TransferFailed)
        })?;

        debug!(amount, total_balance = self.ledger.total_balance(), "issuer withdrawal");
        Ok(VaultEvent::Withdrawn {
            issuer,
            amount,
            total_balance: self.ledger.total_balance(),
        })
    }

    /// Run the effect and interaction phases; restore the ledger if either
    /// fails.
    fn atomically<F>(&mut self, beneficiary: Option<&AccountId>, f: F) -> Result<(), VaultError>
    where
        F: FnOnce(&mut LedgerState) -> Result<(), VaultError>,
    {
        let checkpoint = self.ledger.checkpoint(beneficiary);
        if let Err(e) = f(&mut self.ledger) {
            self.ledger.restore(checkpoint);
            warn!(error = %e, "operation reverted");
            return Err(e);
        }
        Ok(())
    }
}

fn ensure_no_value(ctx: &CallContext) -> Result<(), VaultError> {
    if ctx.value > 0 {
        return Err(VaultError::UnexpectedValue { value: ctx.value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::AccountBook;
    use chequebook_protocol::crypto::Keypair;

    struct Fixture {
        issuer: Keypair,
        vault: Vault,
        book: AccountBook,
    }

    impl Fixture {
        fn new() -> Self {
            let issuer = Keypair::from_seed(&[1u8; 32]);
            let id = AccountId::of(&issuer);
            let vault = Vault::new(id, VaultId::from_bytes([9u8; 32]));
            Self {
                issuer,
                vault,
                book: AccountBook::new(),
            }
        }

        fn issuer_id(&self) -> AccountId {
            AccountId::of(&self.issuer)
        }

        fn fund(&mut self, amount: Amount) {
            let ctx = CallContext::new(self.issuer_id(), amount);
            self.vault.deposit(&ctx).unwrap();
        }

        fn sign(&self, beneficiary: AccountId, recipient: AccountId, amount: Amount) -> Signature {
            Cheque::new(*self.vault.vault_id(), beneficiary, recipient, amount).sign(&self.issuer)
        }

        fn cash(
            &mut self,
            caller: AccountId,
            recipient: AccountId,
            amount: Amount,
            sig: &Signature,
        ) -> Result<VaultEvent, VaultError> {
            self.vault.cash_cheque_beneficiary(
                &CallContext::from(caller),
                &recipient,
                amount,
                sig,
                &mut self.book,
            )
        }
    }

    fn account(byte: u8) -> AccountId {
        AccountId::from_bytes([byte; 32])
    }

    #[test]
    fn cash_pays_delta_to_recipient() {
        let mut fx = Fixture::new();
        fx.fund(1000);
        let (bob, carol) = (account(2), account(3));

        let sig = fx.sign(bob, carol, 300);
        let event = fx.cash(bob, carol, 300, &sig).unwrap();
        assert!(matches!(event, VaultEvent::ChequeCashed { delta: 300, .. }));

        let sig = fx.sign(bob, carol, 450);
        fx.cash(bob, carol, 450, &sig).unwrap();

        assert_eq!(fx.book.balance_of(&carol), 450);
        assert_eq!(fx.vault.paid_out_cheques(&bob), 450);
        assert_eq!(fx.vault.total_paid_out_cheques(), 450);
        assert_eq!(fx.vault.total_balance(), 550);
    }

    #[test]
    fn signature_checked_before_balance_and_monotonicity() {
        let mut fx = Fixture::new();
        let bob = account(2);
        let forged = Keypair::generate().sign(b"nothing");
        // Empty vault and zero amount: the signature error still wins.
        assert_eq!(
            fx.cash(bob, bob, 0, &forged),
            Err(VaultError::InvalidIssuerSignature)
        );
        assert_eq!(
            fx.cash(bob, bob, 500, &forged),
            Err(VaultError::InvalidIssuerSignature)
        );
    }

    #[test]
    fn value_guard_runs_first() {
        let mut fx = Fixture::new();
        let bob = account(2);
        let sig = fx.sign(bob, bob, 10);
        let ctx = CallContext::new(bob, 1);
        assert_eq!(
            fx.vault
                .cash_cheque_beneficiary(&ctx, &bob, 10, &sig, &mut fx.book),
            Err(VaultError::UnexpectedValue { value: 1 })
        );
        let issuer_ctx = CallContext::new(fx.issuer_id(), 1);
        assert_eq!(
            fx.vault.withdraw(&issuer_ctx, 0, &mut fx.book),
            Err(VaultError::UnexpectedValue { value: 1 })
        );
    }

    #[test]
    fn zero_cumulative_payout_cannot_be_cashed() {
        let mut fx = Fixture::new();
        fx.fund(10);
        let bob = account(2);
        let sig = fx.sign(bob, bob, 0);
        assert!(matches!(
            fx.cash(bob, bob, 0, &sig),
            Err(VaultError::CannotCash { paid_out: 0, cumulative_payout: 0 })
        ));
    }

    #[test]
    fn failed_transfer_reverts_cash() {
        let mut fx = Fixture::new();
        fx.fund(1000);
        let (bob, carol) = (account(2), account(3));
        fx.book.reject_incoming(carol);
        let before = fx.vault.clone();

        let sig = fx.sign(bob, carol, 500);
        let err = fx.cash(bob, carol, 500, &sig).unwrap_err();
        assert_eq!(err, VaultError::TransferFailed(TransferError::Rejected(carol)));
        assert_eq!(fx.vault, before);
        assert_eq!(fx.vault.paid_out_cheques(&bob), 0);

        // Same cheque succeeds once the recipient accepts value again.
        fx.book.accept_incoming(&carol);
        fx.cash(bob, carol, 500, &sig).unwrap();
        assert_eq!(fx.book.balance_of(&carol), 500);
    }

    #[test]
    fn failed_transfer_reverts_withdraw() {
        let mut fx = Fixture::new();
        fx.fund(100);
        let issuer = fx.issuer_id();
        fx.book.reject_incoming(issuer);
        let err = fx
            .vault
            .withdraw(&CallContext::from(issuer), 40, &mut fx.book)
            .unwrap_err();
        assert_eq!(err.kind(), "transfer_failed");
        assert_eq!(fx.vault.total_balance(), 100);
    }

    #[test]
    fn deposit_overflow_is_rejected() {
        let mut fx = Fixture::new();
        fx.fund(u64::MAX);
        let ctx = CallContext::new(account(4), 1);
        assert_eq!(fx.vault.deposit(&ctx), Err(VaultError::BalanceOverflow));
        assert_eq!(fx.vault.total_balance(), u64::MAX);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut fx = Fixture::new();
        fx.fund(1000);
        let bob = account(2);
        let sig = fx.sign(bob, bob, 250);
        fx.cash(bob, bob, 250, &sig).unwrap();

        let json = serde_json::to_string(&fx.vault.snapshot()).unwrap();
        let restored =
            Vault::from_snapshot(serde_json::from_str::<VaultSnapshot>(&json).unwrap()).unwrap();
        assert_eq!(restored, fx.vault);
    }

    #[test]
    fn error_kinds_are_distinct() {
        let errors = [
            VaultError::UnexpectedValue { value: 1 },
            VaultError::InvalidIssuerSignature,
            VaultError::CannotCash { paid_out: 1, cumulative_payout: 1 },
            VaultError::InsufficientBalance { delta: 1, available: 0 },
            VaultError::NotIssuer,
            VaultError::InsufficientTotalBalance { requested: 1, available: 0 },
            VaultError::TransferFailed(TransferError::Unavailable("down".into())),
            VaultError::BalanceOverflow,
            VaultError::Ledger(LedgerError::PaidOutOverflow),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }
}
