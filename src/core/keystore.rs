//! On-disk ed25519 key store.
//!
//! Key files live in a directory that must be owned by the running user
//! (real and effective uid) with mode 0700. Files are JSON arrays of 64
//! integers: the secret seed followed by the public key. Secret material
//! stays inside the store; callers get public keys by value and signing
//! handles as `Arc<Keypair>`.

use std::collections::HashMap;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::key::{Keypair, Pubkey};
use crate::error::{Error, Result};

/// Well-known account tags available without loading a key file.
const WELL_KNOWN_KEYS: &[(&str, &str)] = &[
    ("sysvar_rent", "SysvarRent111111111111111111111111111111111"),
    ("spl_token_program", "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"),
    ("system_program", "11111111111111111111111111111111"),
    ("pyth_usdt_product", "Av6XyAMJnyi68FdsKSPYgzfXGjYrrt6jcAMwtvzLCqaM"),
    ("mainnet_usdt", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
];

pub struct KeyStore {
    directory: PathBuf,
    pubkeys: RwLock<HashMap<String, Pubkey>>,
    keypairs: RwLock<HashMap<String, Arc<Keypair>>>,
}

impl KeyStore {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        let mut pubkeys = HashMap::new();
        for (tag, base58) in WELL_KNOWN_KEYS {
            let key = Pubkey::from_base58(base58).expect("well-known key literals are valid");
            pubkeys.insert((*tag).to_string(), key);
        }
        // The zero address doubles as the "no account" sentinel.
        pubkeys.insert("sysvar_program".to_string(), Pubkey::ZERO);

        Self {
            directory: directory.into(),
            pubkeys: RwLock::new(pubkeys),
            keypairs: RwLock::new(HashMap::new()),
        }
    }

    fn keypair_path(&self, tag: &str) -> PathBuf {
        self.directory.join(format!("{}_keypair.json", tag))
    }

    /// Create the store directory with owner-only permissions.
    pub fn create_directory(&self) -> Result<()> {
        std::fs::create_dir(&self.directory).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                Error::InvalidArgument(format!("key store directory already exists: {}", self.directory.display()))
            }
            _ => Error::Io(e),
        })?;
        std::fs::set_permissions(&self.directory, std::fs::Permissions::from_mode(0o700))?;
        info!(path = %self.directory.display(), "Created key store directory");
        Ok(())
    }

    /// Verify the store directory exists, is owned by the caller (real and
    /// effective uid) and is accessible only by the owner.
    pub fn verify_directory(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.directory).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("key store directory does not exist: {}", self.directory.display()))
            }
            _ => Error::Io(e),
        })?;

        if !metadata.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "key store path is not a directory: {}",
                self.directory.display()
            )));
        }

        let uid = metadata.uid();
        // SAFETY: getuid/geteuid have no failure modes or side effects.
        let (real, effective) = unsafe { (libc::getuid(), libc::geteuid()) };
        if uid != real || uid != effective {
            return Err(Error::Permission(
                "caller must own the key store directory".into(),
            ));
        }

        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o700 != 0o700 {
            return Err(Error::Permission(
                "owner must have full access to the key store directory".into(),
            ));
        }
        if mode & 0o077 != 0 {
            return Err(Error::Permission(
                "key store directory must not be accessible by group or others".into(),
            ));
        }

        debug!(path = %self.directory.display(), "Verified key store directory");
        Ok(())
    }

    /// Generate a key pair and persist it under `tag`, defaulting the tag to
    /// the base58 public key. Fails if the key file already exists.
    pub fn create_keypair(&self, tag: Option<&str>) -> Result<String> {
        let keypair = Keypair::generate();
        let tag = tag
            .map(str::to_string)
            .unwrap_or_else(|| keypair.pubkey().to_base58());

        let path = self.keypair_path(&tag);
        self.write_keypair_file(&keypair, &path)?;
        info!(tag = %tag, pubkey = %keypair.pubkey(), "Created key pair");

        self.pubkeys.write().insert(tag.clone(), keypair.pubkey());
        self.keypairs.write().insert(tag.clone(), Arc::new(keypair));
        Ok(tag)
    }

    fn write_keypair_file(&self, keypair: &Keypair, path: &Path) -> Result<()> {
        use std::io::Write;

        let json = serde_json::to_string(&keypair.to_json_array())?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Error::InvalidArgument(format!("key file already exists: {}", path.display()))
                }
                _ => Error::Io(e),
            })?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Load a key pair from disk. Idempotent when the tag is already loaded.
    pub fn load_keypair(&self, tag: &str) -> Result<()> {
        if self.keypairs.read().contains_key(tag) {
            return Ok(());
        }

        let path = self.keypair_path(tag);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("key file does not exist: {}", path.display()))
            }
            _ => Error::Io(e),
        })?;
        let bytes: Vec<u8> = serde_json::from_str(&content)
            .map_err(|e| Error::Deserialize(format!("invalid key file {}: {}", path.display(), e)))?;
        let keypair = Keypair::from_json_array(&bytes)?;

        info!(tag = %tag, pubkey = %keypair.pubkey(), "Loaded key pair");
        self.pubkeys.write().insert(tag.to_string(), keypair.pubkey());
        self.keypairs.write().insert(tag.to_string(), Arc::new(keypair));
        Ok(())
    }

    pub fn pubkey(&self, tag: &str) -> Result<Pubkey> {
        self.pubkeys
            .read()
            .get(tag)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("public key not loaded: {}", tag)))
    }

    pub fn keypair(&self, tag: &str) -> Result<Arc<Keypair>> {
        self.keypairs
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("key pair not loaded: {}", tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> KeyStore {
        KeyStore::new(dir.path().join("keys"))
    }

    #[test]
    fn create_and_verify_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create_directory().unwrap();
        store.verify_directory().unwrap();
    }

    #[test]
    fn verify_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.verify_directory(), Err(Error::NotFound(_))));
    }

    #[test]
    fn verify_rejects_group_readable_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create_directory().unwrap();
        std::fs::set_permissions(
            dir.path().join("keys"),
            std::fs::Permissions::from_mode(0o750),
        )
        .unwrap();
        assert!(matches!(store.verify_directory(), Err(Error::Permission(_))));
    }

    #[test]
    fn keypair_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create_directory().unwrap();

        let tag = store.create_keypair(Some("trader")).unwrap();
        assert_eq!(tag, "trader");
        let original = store.keypair("trader").unwrap().pubkey();

        // A fresh store must read the same key back from disk.
        let reloaded = store_in(&dir);
        reloaded.load_keypair("trader").unwrap();
        assert_eq!(reloaded.pubkey("trader").unwrap(), original);
        // Idempotent reload.
        reloaded.load_keypair("trader").unwrap();
    }

    #[test]
    fn create_keypair_defaults_tag_to_pubkey() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create_directory().unwrap();

        let tag = store.create_keypair(None).unwrap();
        assert_eq!(store.pubkey(&tag).unwrap().to_base58(), tag);
    }

    #[test]
    fn create_keypair_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.create_directory().unwrap();
        store.create_keypair(Some("dup")).unwrap();
        assert!(store.create_keypair(Some("dup")).is_err());
    }

    #[test]
    fn well_known_tags_are_preloaded() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(!store.pubkey("spl_token_program").unwrap().is_zero());
        assert!(store.pubkey("sysvar_program").unwrap().is_zero());
        assert!(matches!(store.keypair("spl_token_program"), Err(Error::NotFound(_))));
    }
}
