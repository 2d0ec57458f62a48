//! # VaultStore: Persistent Vault State
//!
//! The node's ledger, external account balances and caller nonces, kept in
//! a single sled tree. Keys are prefixed by record type:
//!
//! | Key                         | Value                 |
//! |-----------------------------|-----------------------|
//! | `meta:vault_id`             | `bincode(VaultId)`    |
//! | `meta:issuer`               | `bincode(AccountId)`  |
//! | `meta:total_balance`        | `bincode(u64)`        |
//! | `meta:total_paid_out`       | `bincode(u64)`        |
//! | `paid:` + account (32B)     | `bincode(u64)`        |
//! | `acct:` + account (32B)     | `bincode(u64)`        |
//! | `nonce:` + account (32B)    | `bincode(u64)`        |
//!
//! ## Atomicity
//!
//! Every accepted or rejected call is written as one [`Commit`] in a single
//! sled `Batch` on a single tree. Either the new totals, the payout record,
//! the credited account and the caller's nonce all land, or none of them do.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;

use chequebook_contracts::{
    AccountBook, Amount, LedgerError, LedgerState, Vault, VaultEvent, VaultSnapshot,
};
use chequebook_protocol::identity::{AccountId, VaultId};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("stored ledger rejected: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store belongs to vault {stored}, manifest names {expected}")]
    VaultMismatch { stored: VaultId, expected: VaultId },
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

const TREE_NAME: &str = "vault";

const META_VAULT_ID: &[u8] = b"meta:vault_id";
const META_ISSUER: &[u8] = b"meta:issuer";
const META_TOTAL_BALANCE: &[u8] = b"meta:total_balance";
const META_TOTAL_PAID_OUT: &[u8] = b"meta:total_paid_out";

const PAID_PREFIX: &[u8] = b"paid:";
const ACCOUNT_PREFIX: &[u8] = b"acct:";
const NONCE_PREFIX: &[u8] = b"nonce:";

fn account_key(prefix: &[u8], account: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 32);
    key.extend_from_slice(prefix);
    key.extend_from_slice(account.as_bytes());
    key
}

fn account_from_key(prefix: &[u8], key: &[u8]) -> StoreResult<AccountId> {
    let raw: [u8; 32] = key[prefix.len()..]
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("bad key length {}", key.len())))?;
    Ok(AccountId::from_bytes(raw))
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Everything one call changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub caller: AccountId,
    pub nonce: u64,
    /// `(total_balance, total_paid_out)` after the call.
    pub totals: Option<(Amount, Amount)>,
    /// New cumulative payout for a beneficiary.
    pub payout: Option<(AccountId, Amount)>,
    /// New balance of an external account that received value.
    pub credited: Option<(AccountId, Amount)>,
}

impl Commit {
    /// A call the vault rejected: only the nonce is consumed.
    pub fn nonce_only(caller: AccountId, nonce: u64) -> Self {
        Self {
            caller,
            nonce,
            totals: None,
            payout: None,
            credited: None,
        }
    }

    /// A call the vault accepted, read back from the staged state.
    pub fn accepted(
        caller: AccountId,
        nonce: u64,
        vault: &Vault,
        book: &AccountBook,
        event: &VaultEvent,
    ) -> Self {
        let (payout, credited) = match event {
            VaultEvent::Deposited { .. } => (None, None),
            VaultEvent::ChequeCashed {
                beneficiary,
                recipient,
                cumulative_payout,
                ..
            } => (
                Some((*beneficiary, *cumulative_payout)),
                Some((*recipient, book.balance_of(recipient))),
            ),
            VaultEvent::Withdrawn { issuer, .. } => (None, Some((*issuer, book.balance_of(issuer)))),
        };
        Self {
            caller,
            nonce,
            totals: Some((vault.total_balance(), vault.total_paid_out_cheques())),
            payout,
            credited,
        }
    }
}

/// What [`VaultStore::load`] hands back.
#[derive(Debug)]
pub struct StoredVault {
    pub vault: Vault,
    pub book: AccountBook,
    pub nonces: Vec<(AccountId, u64)>,
}

// ---------------------------------------------------------------------------
// VaultStore
// ---------------------------------------------------------------------------

/// sled-backed persistence for one vault.
///
/// Cheap to clone; sled handles are reference counted.
#[derive(Debug, Clone)]
pub struct VaultStore {
    db: Db,
    tree: Tree,
}

impl VaultStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A store that lives in a temp directory and disappears on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    /// Write the identity and totals of a fresh vault.
    pub fn initialize(&self, vault: &Vault) -> StoreResult<()> {
        let mut batch = Batch::default();
        batch.insert(META_VAULT_ID, encode(vault.vault_id())?);
        batch.insert(META_ISSUER, encode(vault.issuer())?);
        batch.insert(META_TOTAL_BALANCE, encode(&vault.total_balance())?);
        batch.insert(META_TOTAL_PAID_OUT, encode(&vault.total_paid_out_cheques())?);
        self.tree.apply_batch(batch)?;
        self.db.flush()?;
        tracing::info!(vault_id = %vault.vault_id(), "vault initialized in store");
        Ok(())
    }

    /// Apply one call's changes atomically and flush.
    pub fn commit(&self, commit: &Commit) -> StoreResult<()> {
        let mut batch = Batch::default();
        batch.insert(account_key(NONCE_PREFIX, &commit.caller), encode(&commit.nonce)?);
        if let Some((balance, paid_out)) = commit.totals {
            batch.insert(META_TOTAL_BALANCE, encode(&balance)?);
            batch.insert(META_TOTAL_PAID_OUT, encode(&paid_out)?);
        }
        if let Some((beneficiary, amount)) = &commit.payout {
            batch.insert(account_key(PAID_PREFIX, beneficiary), encode(amount)?);
        }
        if let Some((account, balance)) = &commit.credited {
            batch.insert(account_key(ACCOUNT_PREFIX, account), encode(balance)?);
        }
        self.tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Rebuild the vault, account book and nonces. `None` if the store has
    /// never been initialized.
    pub fn load(&self) -> StoreResult<Option<StoredVault>> {
        let vault_id: VaultId = match self.tree.get(META_VAULT_ID)? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(None),
        };
        let issuer: AccountId = self.required(META_ISSUER)?;
        let total_balance: Amount = self.required(META_TOTAL_BALANCE)?;
        let total_paid_out: Amount = self.required(META_TOTAL_PAID_OUT)?;

        let paid_out: BTreeMap<AccountId, Amount> =
            self.scan(PAID_PREFIX)?.into_iter().collect();
        let book: AccountBook = self.scan(ACCOUNT_PREFIX)?.into_iter().collect();
        let nonces = self.scan(NONCE_PREFIX)?;

        let ledger = LedgerState::from_parts(issuer, total_balance, paid_out, total_paid_out)?;
        let vault = Vault::from_snapshot(VaultSnapshot { vault_id, ledger })?;

        tracing::info!(
            vault_id = %vault_id,
            total_balance,
            total_paid_out,
            beneficiaries = vault.ledger().beneficiaries().count(),
            "vault loaded from store"
        );
        Ok(Some(StoredVault {
            vault,
            book,
            nonces,
        }))
    }

    fn required<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<T> {
        let bytes = self.tree.get(key)?.ok_or_else(|| {
            StoreError::Corrupt(format!("missing {}", String::from_utf8_lossy(key)))
        })?;
        decode(&bytes)
    }

    fn scan(&self, prefix: &[u8]) -> StoreResult<Vec<(AccountId, u64)>> {
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                let (key, value) = entry?;
                Ok((account_from_key(prefix, &key)?, decode(&value)?))
            })
            .collect()
    }

    /// Force pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chequebook_contracts::{CallContext, Cheque};
    use chequebook_protocol::crypto::Keypair;

    fn fresh_vault(issuer: &Keypair) -> Vault {
        Vault::new(AccountId::of(issuer), VaultId::from_bytes([5u8; 32]))
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = VaultStore::open_temporary().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn initialized_vault_roundtrips() {
        let issuer = Keypair::generate();
        let store = VaultStore::open_temporary().unwrap();
        let vault = fresh_vault(&issuer);
        store.initialize(&vault).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.vault, vault);
        assert!(loaded.nonces.is_empty());
    }

    #[test]
    fn commits_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = Keypair::generate();
        let issuer_id = AccountId::of(&issuer);
        let bob = AccountId::from_bytes([2u8; 32]);
        let carol = AccountId::from_bytes([3u8; 32]);

        let mut vault = fresh_vault(&issuer);
        let mut book = AccountBook::new();
        {
            let store = VaultStore::open(dir.path()).unwrap();
            store.initialize(&vault).unwrap();

            let event = vault.deposit(&CallContext::new(issuer_id, 1000)).unwrap();
            store
                .commit(&Commit::accepted(issuer_id, 1, &vault, &book, &event))
                .unwrap();

            let sig = Cheque::new(*vault.vault_id(), bob, carol, 400).sign(&issuer);
            let event = vault
                .cash_cheque_beneficiary(&CallContext::from(bob), &carol, 400, &sig, &mut book)
                .unwrap();
            store
                .commit(&Commit::accepted(bob, 1, &vault, &book, &event))
                .unwrap();

            store.commit(&Commit::nonce_only(bob, 2)).unwrap();
        }

        let store = VaultStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.vault, vault);
        assert_eq!(loaded.book.balance_of(&carol), 400);
        let mut nonces = loaded.nonces;
        nonces.sort();
        let mut expected = vec![(issuer_id, 1), (bob, 2)];
        expected.sort();
        assert_eq!(nonces, expected);
    }

    #[test]
    fn inconsistent_totals_are_refused() {
        let issuer = Keypair::generate();
        let store = VaultStore::open_temporary().unwrap();
        store.initialize(&fresh_vault(&issuer)).unwrap();
        store
            .commit(&Commit {
                caller: AccountId::of(&issuer),
                nonce: 1,
                totals: Some((0, 99)),
                payout: None,
                credited: None,
            })
            .unwrap();
        assert!(matches!(store.load(), Err(StoreError::Ledger(_))));
    }
}
