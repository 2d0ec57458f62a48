//! # Signature Verifier
//!
//! Stateless Ed25519 signing and verification. The vault engine calls
//! [`verify`] with the canonical cheque bytes and the issuer's key; the node
//! calls it with call-envelope digests and the caller's key.
//!
//! ## Strictness
//!
//! Verification goes through `verify_strict`. Ed25519 as specified in RFC
//! 8032 leaves room for more than one accepted encoding of a signature (a
//! non-reduced `s`, or small-order components). Strict mode accepts only the
//! canonical form, so a cheque signature cannot be "re-spelled" into a second
//! valid signature for the same cheque.

use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};

/// Errors from the byte-level verification path.
///
/// Intentionally vague; we don't tell attackers why verification failed.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature bytes: expected 64 bytes")]
    InvalidSignatureBytes,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message with a keypair.
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify a signature against a claimed signer and message.
///
/// Returns `true` iff `signature` is the canonical Ed25519 signature by
/// `signer` over exactly `message`. Malformed signatures and invalid keys
/// return `false`.
pub fn verify(signer: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    signer.verify(message, signature)
}

/// Verify using raw byte components straight off the wire.
pub fn verify_raw(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), SignatureError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;

    let sig_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidSignatureBytes)?;
    let signature = DalekSignature::from_bytes(&sig_bytes);

    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Verify many signatures; fails if any one fails, without saying which.
pub fn batch_verify(items: &[(PublicKey, Vec<u8>, Signature)]) -> Result<(), SignatureError> {
    for (pubkey, message, signature) in items {
        if !verify(pubkey, message, signature) {
            return Err(SignatureError::VerificationFailed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Order of the Ed25519 prime-order subgroup, little-endian.
    const GROUP_ORDER_LE: [u8; 32] = [
        0xed, 0xd3, 0xf5, 0x5c, 0x1a, 0x63, 0x12, 0x58, 0xd6, 0x9c, 0xf7, 0xa2, 0xde, 0xf9, 0xde,
        0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x10,
    ];

    /// Adds the group order to the `s` half of a signature, producing the
    /// classic malleated twin that lenient verifiers accept.
    fn malleate(sig: &Signature) -> Signature {
        let mut bytes: [u8; 64] = sig.as_bytes().try_into().unwrap();
        let mut carry = 0u16;
        for i in 0..32 {
            let sum = bytes[32 + i] as u16 + GROUP_ORDER_LE[i] as u16 + carry;
            bytes[32 + i] = sum as u8;
            carry = sum >> 8;
        }
        Signature::from_bytes(bytes)
    }

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"hello, vault");
        assert!(verify(&kp.public_key(), b"hello, vault", &sig));
    }

    #[test]
    fn wrong_message_fails() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"cumulative 500");
        assert!(!verify(&kp.public_key(), b"cumulative 501", &sig));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = sign(&kp1, b"msg");
        assert!(!verify(&kp2.public_key(), b"msg", &sig));
    }

    #[test]
    fn malleated_signature_is_rejected() {
        let kp = Keypair::generate();
        let msg = b"one encoding only";
        let sig = sign(&kp, msg);
        let twin = malleate(&sig);
        assert_ne!(sig, twin);
        assert!(verify(&kp.public_key(), msg, &sig));
        assert!(!verify(&kp.public_key(), msg, &twin));
    }

    #[test]
    fn garbled_lengths_are_invalid_not_panics() {
        let kp = Keypair::generate();
        for len in [0usize, 1, 63, 65, 128] {
            let sig = Signature::from_untrusted(vec![7u8; len]);
            assert!(!verify(&kp.public_key(), b"m", &sig));
        }
        assert!(matches!(
            verify_raw(kp.public_key().as_bytes(), b"m", &[0u8; 10]),
            Err(SignatureError::InvalidSignatureBytes)
        ));
    }

    #[test]
    fn verify_raw_accepts_valid_signature() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"raw");
        assert!(verify_raw(kp.public_key().as_bytes(), b"raw", sig.as_bytes()).is_ok());
    }

    #[test]
    fn batch_verify_one_bad_apple() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let good = (kp1.public_key(), b"a".to_vec(), sign(&kp1, b"a"));
        let bad = (kp1.public_key(), b"b".to_vec(), sign(&kp2, b"b"));
        assert!(batch_verify(std::slice::from_ref(&good)).is_ok());
        assert!(batch_verify(&[good, bad]).is_err());
        assert!(batch_verify(&[]).is_ok());
    }
}
