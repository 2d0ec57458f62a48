//! # Account Identities
//!
//! An [`AccountId`] names a vault participant: the issuer, a beneficiary, a
//! recipient, or the caller of a node request. It *is* the participant's
//! Ed25519 public key, so the issuer identity can be handed straight to the
//! signature verifier without a key lookup or recovery step.
//!
//! Humans see it as a Bech32 address:
//!
//! ```text
//! public_key (32 bytes) -> Bech32("chq", public_key) -> chq1qw508d6qe...
//! ```
//!
//! Bech32's checksum catches up to four character errors, which matters when
//! an address is pasted into a cheque or a withdraw request.

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ADDRESS_HRP;
use crate::crypto::keys::{Keypair, PublicKey, Signature};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing an account address.
#[derive(Debug, Error)]
pub enum AccountIdError {
    /// The Bech32 string could not be decoded.
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    /// The decoded address has an unexpected human-readable prefix.
    #[error("invalid HRP: expected '{expected}', got '{got}'")]
    InvalidHrp {
        /// The expected HRP.
        expected: String,
        /// The HRP that was actually found.
        got: String,
    },

    /// The decoded data has an unexpected length.
    #[error("invalid address data length: expected {expected} bytes, got {got}")]
    InvalidDataLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// A participant identity: an Ed25519 public key with a Bech32 face.
///
/// Parsing an address does not check that the bytes are a valid curve
/// point. Identities are compared byte-for-byte; a bogus identity simply
/// never verifies a signature.
///
/// # Examples
///
/// ```
/// use chequebook_protocol::crypto::Keypair;
/// use chequebook_protocol::identity::AccountId;
///
/// let kp = Keypair::generate();
/// let id = AccountId::from_public_key(&kp.public_key());
/// let address = id.to_address();
/// assert!(address.starts_with("chq1"));
/// assert_eq!(address.parse::<AccountId>().unwrap(), id);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId {
    key: PublicKey,
}

impl AccountId {
    /// Identity of the holder of `pk`.
    pub fn from_public_key(pk: &PublicKey) -> Self {
        Self { key: *pk }
    }

    /// Identity of the holder of `keypair`.
    pub fn of(keypair: &Keypair) -> Self {
        Self::from_public_key(&keypair.public_key())
    }

    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            key: PublicKey::from_bytes(bytes),
        }
    }

    /// The raw 32 bytes; this is what goes into canonical encodings.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// The public key behind this identity.
    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// Returns `true` iff `signature` was produced by this identity over
    /// exactly `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.key.verify(message, signature)
    }

    /// Encode as a Bech32 address (`chq1…`).
    pub fn to_address(&self) -> String {
        let hrp = Hrp::parse_unchecked(ADDRESS_HRP);
        // 32 data bytes are far below Bech32's length limit, so encoding
        // cannot fail; fall back to hex just in case the library disagrees.
        bech32::encode::<Bech32>(hrp, self.key.as_bytes())
            .unwrap_or_else(|_| self.key.to_hex())
    }

    /// Parse a Bech32 address, checking prefix, checksum and length.
    pub fn from_address(addr: &str) -> Result<Self, AccountIdError> {
        let (hrp, data) =
            bech32::decode(addr).map_err(|e| AccountIdError::Bech32Decode(e.to_string()))?;

        if hrp.as_str() != ADDRESS_HRP {
            return Err(AccountIdError::InvalidHrp {
                expected: ADDRESS_HRP.to_string(),
                got: hrp.to_string(),
            });
        }

        let bytes: [u8; 32] =
            data.as_slice()
                .try_into()
                .map_err(|_| AccountIdError::InvalidDataLength {
                    expected: 32,
                    got: data.len(),
                })?;

        Ok(Self::from_bytes(bytes))
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_address(s)
    }
}

impl From<PublicKey> for AccountId {
    fn from(pk: PublicKey) -> Self {
        Self { key: pk }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_address())
    }
}

impl Serialize for AccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_address())
        } else {
            serializer.serialize_bytes(self.as_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            AccountId::from_address(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                serde::de::Error::custom(format!("expected 32-byte account id, got {}", bytes.len()))
            })?;
            Ok(AccountId::from_bytes(arr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let id = AccountId::of(&Keypair::generate());
        let addr = id.to_address();
        assert!(addr.starts_with("chq1"));
        assert_eq!(AccountId::from_address(&addr).unwrap(), id);
    }

    #[test]
    fn distinct_keys_give_distinct_addresses() {
        let a = AccountId::of(&Keypair::generate());
        let b = AccountId::of(&Keypair::generate());
        assert_ne!(a, b);
        assert_ne!(a.to_address(), b.to_address());
    }

    #[test]
    fn wrong_hrp_rejected() {
        let hrp = Hrp::parse("bc").unwrap();
        let foreign = bech32::encode::<Bech32>(hrp, &[9u8; 32]).unwrap();
        assert!(matches!(
            AccountId::from_address(&foreign),
            Err(AccountIdError::InvalidHrp { .. })
        ));
    }

    #[test]
    fn wrong_length_rejected() {
        let hrp = Hrp::parse(ADDRESS_HRP).unwrap();
        let short = bech32::encode::<Bech32>(hrp, &[9u8; 20]).unwrap();
        assert!(matches!(
            AccountId::from_address(&short),
            Err(AccountIdError::InvalidDataLength { expected: 32, got: 20 })
        ));
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut addr = AccountId::of(&Keypair::generate()).to_address();
        let last = addr.pop().unwrap();
        addr.push(if last == 'q' { 'p' } else { 'q' });
        assert!(AccountId::from_address(&addr).is_err());
    }

    #[test]
    fn verifies_own_signatures_only() {
        let kp = Keypair::generate();
        let id = AccountId::of(&kp);
        let sig = kp.sign(b"payload");
        assert!(id.verify(b"payload", &sig));
        assert!(!AccountId::of(&Keypair::generate()).verify(b"payload", &sig));
    }

    #[test]
    fn json_uses_address_string() {
        let id = AccountId::of(&Keypair::generate());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_address()));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
