//! # Signed Calls
//!
//! The vault takes the caller identity as a parameter and trusts nothing
//! about it. This module is where the node earns the right to fill that
//! parameter in: every call arrives as a [`CallEnvelope`] signed by the
//! caller's own key.
//!
//! ```text
//! digest = BLAKE3-derive_key("chequebook call v1",
//!              bincode(vault_id, caller, nonce, value, operation))
//! ```
//!
//! Validation order: envelope signature first, then nonce. A forged
//! envelope never learns the caller's current nonce.
//!
//! Nonces are per caller and strictly sequential: the first call from an
//! account carries nonce 1, each later call `last + 1`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chequebook_contracts::{Amount, CallContext};
use chequebook_protocol::config::CALL_DIGEST_CONTEXT;
use chequebook_protocol::crypto::{domain_separated_hash, Keypair, Signature};
use chequebook_protocol::identity::{AccountId, VaultId};

/// Why an envelope was refused before it reached the vault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("call signature does not match caller")]
    BadSignature,

    #[error("stale or out-of-order nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("call encoding failed: {0}")]
    Encoding(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::BadSignature => "bad_call_signature",
            AuthError::BadNonce { .. } => "bad_nonce",
            AuthError::Encoding(_) => "encoding",
        }
    }
}

/// The vault operation a call asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Deposit,
    CashCheque {
        recipient: AccountId,
        cumulative_payout: Amount,
        /// The issuer's cheque signature, not the caller's.
        signature: Signature,
    },
    Withdraw {
        amount: Amount,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Deposit => "deposit",
            Operation::CashCheque { .. } => "cash_cheque",
            Operation::Withdraw { .. } => "withdraw",
        }
    }
}

/// A caller-signed request to run one vault operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub caller: AccountId,
    pub nonce: u64,
    #[serde(default)]
    pub value: Amount,
    pub operation: Operation,
    pub signature: Signature,
}

/// The 32-byte digest a caller signs.
pub fn call_digest(
    vault_id: &VaultId,
    caller: &AccountId,
    nonce: u64,
    value: Amount,
    operation: &Operation,
) -> Result<[u8; 32], AuthError> {
    let encoded = bincode::serialize(&(vault_id, caller, nonce, value, operation))
        .map_err(|e| AuthError::Encoding(e.to_string()))?;
    Ok(domain_separated_hash(CALL_DIGEST_CONTEXT, &encoded))
}

impl CallEnvelope {
    /// Build and sign an envelope. Used by clients and tests.
    pub fn sign(
        keypair: &Keypair,
        vault_id: &VaultId,
        nonce: u64,
        value: Amount,
        operation: Operation,
    ) -> Result<Self, AuthError> {
        let caller = AccountId::of(keypair);
        let digest = call_digest(vault_id, &caller, nonce, value, &operation)?;
        Ok(Self {
            caller,
            nonce,
            value,
            operation,
            signature: keypair.sign(&digest),
        })
    }

    /// Check the envelope signature against `caller`.
    pub fn verify(&self, vault_id: &VaultId) -> Result<(), AuthError> {
        let digest = call_digest(vault_id, &self.caller, self.nonce, self.value, &self.operation)?;
        if !self.caller.verify(&digest, &self.signature) {
            tracing::warn!(caller = %self.caller, nonce = self.nonce, "rejected call with bad signature");
            return Err(AuthError::BadSignature);
        }
        Ok(())
    }

    /// The authenticated context handed to the vault.
    pub fn context(&self) -> CallContext {
        CallContext::new(self.caller, self.value)
    }
}

/// Last accepted nonce per caller.
#[derive(Debug, Default)]
pub struct NonceTable {
    last: DashMap<AccountId, u64>,
}

impl NonceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted nonce; 0 for an unseen caller.
    pub fn last(&self, caller: &AccountId) -> u64 {
        self.last.get(caller).map(|n| *n).unwrap_or(0)
    }

    /// The nonce the next call from `caller` must carry.
    pub fn expected(&self, caller: &AccountId) -> u64 {
        self.last(caller).saturating_add(1)
    }

    pub fn check(&self, caller: &AccountId, nonce: u64) -> Result<(), AuthError> {
        let expected = self.expected(caller);
        if nonce != expected {
            return Err(AuthError::BadNonce {
                expected,
                got: nonce,
            });
        }
        Ok(())
    }

    pub fn record(&self, caller: AccountId, nonce: u64) {
        self.last.insert(caller, nonce);
    }
}

impl FromIterator<(AccountId, u64)> for NonceTable {
    fn from_iter<I: IntoIterator<Item = (AccountId, u64)>>(iter: I) -> Self {
        Self {
            last: iter.into_iter().collect(),
        }
    }
}
