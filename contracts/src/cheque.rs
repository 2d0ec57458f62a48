//! # Cheques and their Canonical Encoding
//!
//! A cheque says: "the issuer of vault `V` authorizes `beneficiary` to have
//! redeemed, in total, `cumulative_payout`, paid out to `recipient`". What
//! the issuer actually signs is the fixed-layout byte string produced by
//! [`canonical_bytes`]:
//!
//! ```text
//! offset  len  field
//!      0    4  domain tag "CHQB"
//!      4    1  encoding version (1)
//!      5   32  vault id
//!     37   32  beneficiary public key
//!     69   32  recipient public key
//!    101    8  cumulative payout, u64 big-endian
//! ```
//!
//! Every field has a fixed width and a fixed position, so two different
//! cheques can never share an encoding, and an amount has exactly one byte
//! representation.
//!
//! Cheques are never stored by the vault. The engine rebuilds one from the
//! call's parameters (with the caller as beneficiary) and checks the
//! presented signature against it.

use serde::{Deserialize, Serialize};

use chequebook_protocol::config::{
    CHEQUE_DIGEST_CONTEXT, CHEQUE_DOMAIN_TAG, CHEQUE_ENCODING_LENGTH, CHEQUE_ENCODING_VERSION,
};
use chequebook_protocol::crypto::{domain_separated_hash, Keypair, Signature};
use chequebook_protocol::identity::{AccountId, VaultId};

use crate::ledger::Amount;

/// Encode `(vault_id, beneficiary, recipient, cumulative_payout)` into the
/// exact bytes an issuer signs.
pub fn canonical_bytes(
    vault_id: &VaultId,
    beneficiary: &AccountId,
    recipient: &AccountId,
    cumulative_payout: Amount,
) -> [u8; CHEQUE_ENCODING_LENGTH] {
    let mut out = [0u8; CHEQUE_ENCODING_LENGTH];
    out[0..4].copy_from_slice(&CHEQUE_DOMAIN_TAG);
    out[4] = CHEQUE_ENCODING_VERSION;
    out[5..37].copy_from_slice(vault_id.as_bytes());
    out[37..69].copy_from_slice(beneficiary.as_bytes());
    out[69..101].copy_from_slice(recipient.as_bytes());
    out[101..109].copy_from_slice(&cumulative_payout.to_be_bytes());
    out
}

/// The unsigned content of a cheque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cheque {
    /// The vault this cheque draws on.
    pub vault_id: VaultId,
    /// Who may redeem it. Must be the caller at redemption time.
    pub beneficiary: AccountId,
    /// Who receives the value.
    pub recipient: AccountId,
    /// Total amount the beneficiary may have redeemed once this is cashed.
    pub cumulative_payout: Amount,
}

impl Cheque {
    pub fn new(
        vault_id: VaultId,
        beneficiary: AccountId,
        recipient: AccountId,
        cumulative_payout: Amount,
    ) -> Self {
        Self {
            vault_id,
            beneficiary,
            recipient,
            cumulative_payout,
        }
    }

    /// The canonical signed message for this cheque.
    pub fn canonical_bytes(&self) -> [u8; CHEQUE_ENCODING_LENGTH] {
        canonical_bytes(
            &self.vault_id,
            &self.beneficiary,
            &self.recipient,
            self.cumulative_payout,
        )
    }

    /// Sign as the issuer. Off-ledger tooling and tests use this; the vault
    /// itself only verifies.
    pub fn sign(&self, issuer: &Keypair) -> Signature {
        issuer.sign(&self.canonical_bytes())
    }

    /// Returns `true` iff `signature` is `issuer`'s signature over this cheque.
    pub fn is_signed_by(&self, issuer: &AccountId, signature: &Signature) -> bool {
        issuer.verify(&self.canonical_bytes(), signature)
    }

    /// Short digest for correlating log lines. Never signed, never trusted.
    pub fn digest(&self) -> [u8; 32] {
        domain_separated_hash(CHEQUE_DIGEST_CONTEXT, &self.canonical_bytes())
    }

    /// Hex of the first 8 bytes of [`digest`](Self::digest).
    pub fn short_id(&self) -> String {
        hex::encode(&self.digest()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (VaultId, AccountId, AccountId) {
        (
            VaultId::from_bytes([0x11; 32]),
            AccountId::from_bytes([0x22; 32]),
            AccountId::from_bytes([0x33; 32]),
        )
    }

    #[test]
    fn layout_is_fixed() {
        let (vault, bob, carol) = ids();
        let bytes = canonical_bytes(&vault, &bob, &carol, 500);
        assert_eq!(bytes.len(), 109);
        assert_eq!(&bytes[0..4], b"CHQB");
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[5..37], &[0x11; 32]);
        assert_eq!(&bytes[37..69], &[0x22; 32]);
        assert_eq!(&bytes[69..101], &[0x33; 32]);
        assert_eq!(&bytes[101..109], &500u64.to_be_bytes());
    }

    #[test]
    fn identical_inputs_identical_bytes() {
        let (vault, bob, carol) = ids();
        assert_eq!(
            canonical_bytes(&vault, &bob, &carol, 42),
            canonical_bytes(&vault, &bob, &carol, 42)
        );
    }

    #[test]
    fn every_field_changes_the_encoding() {
        let (vault, bob, carol) = ids();
        let base = canonical_bytes(&vault, &bob, &carol, 500);
        let other_vault = VaultId::from_bytes([0x12; 32]);
        assert_ne!(base, canonical_bytes(&other_vault, &bob, &carol, 500));
        assert_ne!(base, canonical_bytes(&vault, &carol, &carol, 500));
        assert_ne!(base, canonical_bytes(&vault, &bob, &bob, 500));
        assert_ne!(base, canonical_bytes(&vault, &bob, &carol, 501));
    }

    #[test]
    fn beneficiary_and_recipient_are_not_interchangeable() {
        let (vault, bob, carol) = ids();
        assert_ne!(
            canonical_bytes(&vault, &bob, &carol, 1),
            canonical_bytes(&vault, &carol, &bob, 1)
        );
    }

    #[test]
    fn signed_cheque_verifies_only_for_issuer() {
        let issuer = Keypair::generate();
        let stranger = Keypair::generate();
        let (vault, bob, carol) = ids();
        let cheque = Cheque::new(vault, bob, carol, 500);
        let sig = cheque.sign(&issuer);
        assert!(cheque.is_signed_by(&AccountId::of(&issuer), &sig));
        assert!(!cheque.is_signed_by(&AccountId::of(&stranger), &sig));
    }

    #[test]
    fn digest_is_stable_and_distinct() {
        let (vault, bob, carol) = ids();
        let a = Cheque::new(vault, bob, carol, 500);
        let b = Cheque::new(vault, bob, carol, 1000);
        assert_eq!(a.digest(), a.digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.short_id().len(), 16);
    }
}
