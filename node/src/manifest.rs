//! Vault manifest (`vault.json`), issuer key file (`issuer.key`) and the
//! layout of a data directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chequebook_protocol::crypto::Keypair;
use chequebook_protocol::identity::{AccountId, VaultId};

pub const MANIFEST_FILE: &str = "vault.json";
pub const ISSUER_KEY_FILE: &str = "issuer.key";
pub const STORE_DIR: &str = "db";

/// Where the sled store of a data directory lives.
pub fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORE_DIR)
}

/// Identity of the vault a data directory serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultManifest {
    pub vault_id: VaultId,
    pub issuer: AccountId,
    pub salt: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl VaultManifest {
    /// A manifest for a new vault owned by `issuer`.
    pub fn create(issuer: AccountId) -> Self {
        let salt = uuid::Uuid::new_v4();
        Self {
            vault_id: VaultId::derive(&issuer, &salt),
            issuer,
            salt,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(MANIFEST_FILE)
    }

    /// Read and check the manifest: the stored id must match the issuer and
    /// salt it was derived from.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::path(data_dir);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&raw)
            .with_context(|| format!("malformed manifest {}", path.display()))?;
        if VaultId::derive(&manifest.issuer, &manifest.salt) != manifest.vault_id {
            bail!("manifest {} has a vault id that does not match its issuer", path.display());
        }
        Ok(manifest)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = Self::path(data_dir);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write manifest {}", path.display()))
    }
}

/// Write the issuer secret key as hex, readable only by the owner on Unix.
pub fn write_issuer_key(data_dir: &Path, keypair: &Keypair) -> Result<PathBuf> {
    let key_path = data_dir.join(ISSUER_KEY_FILE);
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write issuer key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(key_path)
}

/// Set up `data_dir` for a new vault owned by `keypair`.
///
/// An existing vault is refused unless `force` is set. With `force`, the old
/// store is deleted too: its vault id no longer matches the new manifest.
pub fn initialize_data_dir(
    data_dir: &Path,
    keypair: &Keypair,
    force: bool,
) -> Result<(VaultManifest, PathBuf)> {
    let store = store_path(data_dir);
    let occupied = VaultManifest::path(data_dir).exists() || store.exists();
    if occupied && !force {
        bail!(
            "{} already holds a vault; pass --force to replace it",
            data_dir.display()
        );
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    if store.exists() {
        std::fs::remove_dir_all(&store)
            .with_context(|| format!("failed to remove old store {}", store.display()))?;
        tracing::warn!(path = %store.display(), "discarded existing vault store");
    }

    let key_path = write_issuer_key(data_dir, keypair)?;
    let manifest = VaultManifest::create(AccountId::of(keypair));
    manifest.save(data_dir)?;
    Ok((manifest, key_path))
}
