//! # Vault Identities
//!
//! Every vault instance has a 32-byte [`VaultId`] that is mixed into every
//! cheque it will honour. A cheque signed for one vault is therefore dead
//! bytes in front of any other vault, even one with the same issuer.
//!
//! ```text
//! VaultId = BLAKE3-derive_key("chequebook vault-id v1", issuer ‖ salt)
//! ```
//!
//! `salt` is a random UUID chosen at creation, so one issuer can run many
//! vaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::account::AccountId;
use crate::config::VAULT_ID_CONTEXT;
use crate::crypto::hash::domain_separated_hash_multi;

/// Error returned when a hex vault id cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid vault id: expected 64 hex characters")]
pub struct VaultIdParseError;

/// The identity of one vault deployment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VaultId([u8; 32]);

impl VaultId {
    /// Derive the id for a vault owned by `issuer` with the given `salt`.
    pub fn derive(issuer: &AccountId, salt: &Uuid) -> Self {
        Self(domain_separated_hash_multi(
            VAULT_ID_CONTEXT,
            &[issuer.as_bytes(), salt.as_bytes()],
        ))
    }

    /// Derive with a fresh random salt.
    pub fn generate(issuer: &AccountId) -> Self {
        Self::derive(issuer, &Uuid::new_v4())
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for VaultId {
    type Err = VaultIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| VaultIdParseError)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| VaultIdParseError)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultId({})", &self.to_hex()[..16])
    }
}

impl Serialize for VaultId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for VaultId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| serde::de::Error::custom("expected 32-byte vault id"))?;
            Ok(Self(arr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn derivation_is_deterministic() {
        let issuer = AccountId::of(&Keypair::from_seed(&[1u8; 32]));
        let salt = Uuid::from_u128(7);
        assert_eq!(VaultId::derive(&issuer, &salt), VaultId::derive(&issuer, &salt));
    }

    #[test]
    fn salt_and_issuer_both_matter() {
        let a = AccountId::of(&Keypair::from_seed(&[1u8; 32]));
        let b = AccountId::of(&Keypair::from_seed(&[2u8; 32]));
        let s1 = Uuid::from_u128(1);
        let s2 = Uuid::from_u128(2);
        assert_ne!(VaultId::derive(&a, &s1), VaultId::derive(&a, &s2));
        assert_ne!(VaultId::derive(&a, &s1), VaultId::derive(&b, &s1));
    }

    #[test]
    fn hex_roundtrip() {
        let id = VaultId::generate(&AccountId::of(&Keypair::generate()));
        assert_eq!(id.to_hex().parse::<VaultId>().unwrap(), id);
        assert!("abc".parse::<VaultId>().is_err());
    }

    #[test]
    fn json_uses_hex() {
        let id = VaultId::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<VaultId>(&json).unwrap(), id);
    }
}
