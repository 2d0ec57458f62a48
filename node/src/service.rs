//! # Vault Service
//!
//! Glue between the HTTP layer and the vault engine. Owns the live vault,
//! the external account book and the nonce table, and makes every call
//! durable before it becomes visible.
//!
//! A call runs against a *copy* of the live state. The copy's changes are
//! written to the store in one batch; only after that succeeds is the copy
//! swapped in. A crash or storage error at any point leaves the previous
//! state both in memory and on disk.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chequebook_contracts::{AccountBook, Amount, Vault, VaultError, VaultEvent};
use chequebook_protocol::identity::{AccountId, VaultId};

use crate::auth::{AuthError, CallEnvelope, NonceTable, Operation};
use crate::store::{Commit, StoreError, VaultStore};

/// Why `POST /calls` did not produce an event.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl CallError {
    /// Stable identifier used in responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Auth(e) => e.kind(),
            CallError::Vault(e) => e.kind(),
            CallError::Store(_) => "storage",
        }
    }
}

/// Summary served by `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStatus {
    pub vault_id: VaultId,
    pub issuer: AccountId,
    pub total_balance: Amount,
    pub total_paid_out: Amount,
    pub beneficiaries: usize,
}

#[derive(Debug, Clone)]
struct LiveState {
    vault: Vault,
    book: AccountBook,
}

pub struct VaultService {
    vault_id: VaultId,
    state: Mutex<LiveState>,
    nonces: NonceTable,
    store: VaultStore,
}

impl VaultService {
    /// Load the vault from `store`, or create and persist an empty one if
    /// the store is fresh.
    ///
    /// # Errors
    ///
    /// [`StoreError::VaultMismatch`] if the store holds a different vault or
    /// issuer than the one named.
    pub fn load_or_create(
        store: VaultStore,
        issuer: AccountId,
        vault_id: VaultId,
    ) -> Result<Self, StoreError> {
        let (vault, book, nonces) = match store.load()? {
            Some(stored) => {
                if stored.vault.vault_id() != &vault_id || stored.vault.issuer() != &issuer {
                    return Err(StoreError::VaultMismatch {
                        stored: *stored.vault.vault_id(),
                        expected: vault_id,
                    });
                }
                (stored.vault, stored.book, stored.nonces.into_iter().collect())
            }
            None => {
                let vault = Vault::new(issuer, vault_id);
                store.initialize(&vault)?;
                (vault, AccountBook::new(), NonceTable::new())
            }
        };

        Ok(Self {
            vault_id,
            state: Mutex::new(LiveState { vault, book }),
            nonces,
            store,
        })
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    /// Authenticate, execute and persist one call.
    ///
    /// A call the vault rejects still consumes its nonce, so a rejected
    /// envelope can never be replayed later when it might succeed.
    pub fn submit(&self, envelope: &CallEnvelope) -> Result<VaultEvent, CallError> {
        envelope.verify(&self.vault_id)?;

        let mut live = self.state.lock();
        self.nonces.check(&envelope.caller, envelope.nonce)?;

        let mut staged = live.clone();
        let ctx = envelope.context();
        let outcome = match &envelope.operation {
            Operation::Deposit => staged.vault.deposit(&ctx),
            Operation::CashCheque {
                recipient,
                cumulative_payout,
                signature,
            } => staged.vault.cash_cheque_beneficiary(
                &ctx,
                recipient,
                *cumulative_payout,
                signature,
                &mut staged.book,
            ),
            Operation::Withdraw { amount } => {
                staged.vault.withdraw(&ctx, *amount, &mut staged.book)
            }
        };

        let commit = match &outcome {
            Ok(event) => Commit::accepted(
                envelope.caller,
                envelope.nonce,
                &staged.vault,
                &staged.book,
                event,
            ),
            Err(_) => Commit::nonce_only(envelope.caller, envelope.nonce),
        };
        self.store.commit(&commit).map_err(|e| {
            tracing::error!(error = %e, caller = %envelope.caller, "failed to persist call");
            e
        })?;
        self.nonces.record(envelope.caller, envelope.nonce);

        match outcome {
            Ok(event) => {
                *live = staged;
                tracing::info!(
                    caller = %envelope.caller,
                    nonce = envelope.nonce,
                    op = envelope.operation.name(),
                    "call accepted"
                );
                Ok(event)
            }
            Err(e) => {
                tracing::info!(
                    caller = %envelope.caller,
                    nonce = envelope.nonce,
                    op = envelope.operation.name(),
                    reason = e.kind(),
                    "call rejected by vault"
                );
                Err(e.into())
            }
        }
    }

    // -- queries ------------------------------------------------------------

    pub fn status(&self) -> VaultStatus {
        let live = self.state.lock();
        VaultStatus {
            vault_id: self.vault_id,
            issuer: *live.vault.issuer(),
            total_balance: live.vault.total_balance(),
            total_paid_out: live.vault.total_paid_out_cheques(),
            beneficiaries: live.vault.ledger().beneficiaries().count(),
        }
    }

    pub fn issuer(&self) -> AccountId {
        *self.state.lock().vault.issuer()
    }

    pub fn paid_out(&self, beneficiary: &AccountId) -> Amount {
        self.state.lock().vault.paid_out_cheques(beneficiary)
    }

    pub fn total_paid_out(&self) -> Amount {
        self.state.lock().vault.total_paid_out_cheques()
    }

    pub fn account_balance(&self, account: &AccountId) -> Amount {
        self.state.lock().book.balance_of(account)
    }

    /// Flush pending store writes. Called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush()
    }

    /// The nonce `caller` must use next.
    pub fn next_nonce(&self, caller: &AccountId) -> u64 {
        self.nonces.expected(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chequebook_contracts::Cheque;
    use chequebook_protocol::crypto::Keypair;

    struct Harness {
        issuer: Keypair,
        vault_id: VaultId,
        service: VaultService,
    }

    fn harness(store: VaultStore) -> Harness {
        let issuer = Keypair::from_seed(&[4u8; 32]);
        let vault_id = VaultId::from_bytes([6u8; 32]);
        let service = VaultService::load_or_create(store, AccountId::of(&issuer), vault_id).unwrap();
        Harness {
            issuer,
            vault_id,
            service,
        }
    }

    impl Harness {
        fn call(
            &self,
            kp: &Keypair,
            value: Amount,
            op: Operation,
        ) -> Result<VaultEvent, CallError> {
            let nonce = self.service.next_nonce(&AccountId::of(kp));
            let env = CallEnvelope::sign(kp, &self.vault_id, nonce, value, op).unwrap();
            self.service.submit(&env)
        }

        fn cash_op(&self, beneficiary: &Keypair, recipient: AccountId, amount: Amount) -> Operation {
            let cheque = Cheque::new(self.vault_id, AccountId::of(beneficiary), recipient, amount);
            Operation::CashCheque {
                recipient,
                cumulative_payout: amount,
                signature: cheque.sign(&self.issuer),
            }
        }
    }

    #[test]
    fn deposit_cash_withdraw() {
        let h = harness(VaultStore::open_temporary().unwrap());
        let bob = Keypair::generate();
        let carol = AccountId::from_bytes([3u8; 32]);

        h.call(&h.issuer, 1000, Operation::Deposit).unwrap();
        h.call(&bob, 0, h.cash_op(&bob, carol, 300)).unwrap();
        h.call(&h.issuer, 0, Operation::Withdraw { amount: 200 }).unwrap();

        let status = h.service.status();
        assert_eq!(status.total_balance, 500);
        assert_eq!(status.total_paid_out, 300);
        assert_eq!(h.service.paid_out(&AccountId::of(&bob)), 300);
        assert_eq!(h.service.account_balance(&carol), 300);
        assert_eq!(h.service.account_balance(&AccountId::of(&h.issuer)), 200);
    }

    #[test]
    fn rejected_call_consumes_nonce_only() {
        let h = harness(VaultStore::open_temporary().unwrap());
        let alice = Keypair::generate();
        let alice_id = AccountId::of(&alice);

        let err = h
            .call(&alice, 0, Operation::Withdraw { amount: 1 })
            .unwrap_err();
        assert_eq!(err.kind(), "not_issuer");
        assert_eq!(h.service.next_nonce(&alice_id), 2);
        assert_eq!(h.service.status().total_balance, 0);
    }

    #[test]
    fn replayed_envelope_is_refused() {
        let h = harness(VaultStore::open_temporary().unwrap());
        let env = CallEnvelope::sign(&h.issuer, &h.vault_id, 1, 10, Operation::Deposit).unwrap();
        h.service.submit(&env).unwrap();
        let err = h.service.submit(&env).unwrap_err();
        assert!(matches!(
            err,
            CallError::Auth(AuthError::BadNonce { expected: 2, got: 1 })
        ));
        assert_eq!(h.service.status().total_balance, 10);
    }

    #[test]
    fn bad_signature_does_not_touch_nonce() {
        let h = harness(VaultStore::open_temporary().unwrap());
        let mut env =
            CallEnvelope::sign(&h.issuer, &h.vault_id, 1, 10, Operation::Deposit).unwrap();
        env.value = 10_000;
        assert_eq!(h.service.submit(&env).unwrap_err().kind(), "bad_call_signature");
        assert_eq!(h.service.next_nonce(&AccountId::of(&h.issuer)), 1);
    }

    #[test]
    fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let bob = Keypair::generate();
        {
            let h = harness(VaultStore::open(dir.path()).unwrap());
            h.call(&h.issuer, 500, Operation::Deposit).unwrap();
            h.call(&bob, 0, h.cash_op(&bob, AccountId::of(&bob), 120)).unwrap();
        }
        let h = harness(VaultStore::open(dir.path()).unwrap());
        assert_eq!(h.service.paid_out(&AccountId::of(&bob)), 120);
        assert_eq!(h.service.status().total_balance, 380);
        assert_eq!(h.service.next_nonce(&AccountId::of(&bob)), 2);
        assert_eq!(h.service.next_nonce(&AccountId::of(&h.issuer)), 2);
    }

    #[test]
    fn foreign_store_is_refused() {
        let store = VaultStore::open_temporary().unwrap();
        let _ = harness(store.clone());
        let other = VaultService::load_or_create(
            store,
            AccountId::from_bytes([9u8; 32]),
            VaultId::from_bytes([9u8; 32]),
        );
        assert!(matches!(other, Err(StoreError::VaultMismatch { .. })));
    }
}
