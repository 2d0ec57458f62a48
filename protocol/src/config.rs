//! # Protocol Configuration & Constants
//!
//! Every magic number the vault depends on lives here. Changing any of the
//! encoding constants invalidates every cheque ever signed, so treat this
//! file as append-only once a vault is funded.

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cheque Encoding
// ---------------------------------------------------------------------------

/// Domain tag prefixed to every canonical cheque message. Keeps a cheque
/// signature from ever being valid for some other message type signed by the
/// same issuer key.
pub const CHEQUE_DOMAIN_TAG: [u8; 4] = *b"CHQB";

/// Version byte of the canonical cheque layout. Bump on any layout change.
pub const CHEQUE_ENCODING_VERSION: u8 = 1;

/// Total length of the canonical cheque encoding:
/// tag (4) + version (1) + vault id (32) + beneficiary (32) + recipient (32)
/// + cumulative payout (8).
pub const CHEQUE_ENCODING_LENGTH: usize = 4 + 1 + 32 + 32 + 32 + 8;

/// BLAKE3 `derive_key` context for vault identities.
pub const VAULT_ID_CONTEXT: &str = "chequebook vault-id v1";

/// BLAKE3 `derive_key` context for cheque digests (log correlation only,
/// never signed).
pub const CHEQUE_DIGEST_CONTEXT: &str = "chequebook cheque-digest v1";

/// BLAKE3 `derive_key` context for node call envelopes.
pub const CALL_DIGEST_CONTEXT: &str = "chequebook call v1";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 for issuer and caller signatures.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Signing key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Public (verifying) key length in bytes. Also the width of an account id.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// Hash output length in bytes.
pub const HASH_OUTPUT_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Bech32 human-readable prefix for account addresses.
pub const ADDRESS_HRP: &str = "chq";

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;
