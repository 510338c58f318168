//! Persistent node identity.
//!
//! The identity is an opaque 64-byte secret stored in `<dir>/identity`.
//! Only its hash is ever shown or sent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::log;

/// File name of the identity key inside the identity directory.
pub const IDENTITY_FILE: &str = "identity";

/// Key length in bytes.
pub const KEY_LEN: usize = 64;

/// Truncated hash length in bytes.
pub const HASH_LEN: usize = 16;

/// Application name the destination address is derived from.
pub const APP_NAME: &str = "nomadnetwork.node";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity I/O failed at `{0}`")]
    Io(PathBuf, #[source] io::Error),

    #[error("identity file `{path}` has {len} bytes, expected 64")]
    Malformed { path: PathBuf, len: usize },

    #[error("no OS randomness for a new identity: {0}")]
    Random(getrandom::Error),
}

#[derive(Clone)]
pub struct NodeIdentity {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("hash", &self.hash_hex())
            .finish_non_exhaustive()
    }
}

impl NodeIdentity {
    /// Load `<dir>/identity`, creating the directory and a fresh key if absent.
    pub fn load_or_create(dir: &Path) -> Result<Self, IdentityError> {
        let path = dir.join(IDENTITY_FILE);
        match fs::read(&path) {
            Ok(bytes) => Self::from_bytes(&path, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let identity = Self::generate()?;
                identity.save(&path)?;
                log!("identity"; "created new identity {}", identity.hash_hex());
                Ok(identity)
            }
            Err(e) => Err(IdentityError::Io(path, e)),
        }
    }

    fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, IdentityError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| IdentityError::Malformed {
            path: path.to_path_buf(),
            len: bytes.len(),
        })?;
        Ok(Self { key })
    }

    fn generate() -> Result<Self, IdentityError> {
        let mut key = [0u8; KEY_LEN];
        getrandom::fill(&mut key).map_err(IdentityError::Random)?;
        Ok(Self { key })
    }

    fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let io_err = |e| IdentityError::Io(path.to_path_buf(), e);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        fs::write(path, self.key).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }
        Ok(())
    }

    /// Truncated identity hash.
    pub fn hash(&self) -> [u8; HASH_LEN] {
        truncated_hash(&[&self.key])
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Address of this identity's `app_name` destination.
    pub fn destination_hash(&self, app_name: &str) -> [u8; HASH_LEN] {
        truncated_hash(&[app_name.as_bytes(), &self.hash()])
    }
}

/// First `HASH_LEN` bytes of the BLAKE3 digest of `parts`.
pub fn truncated_hash(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..HASH_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_load_same_identity() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("ids");

        let created = NodeIdentity::load_or_create(&dir).unwrap();
        assert_eq!(fs::read(dir.join(IDENTITY_FILE)).unwrap().len(), KEY_LEN);

        let loaded = NodeIdentity::load_or_create(&dir).unwrap();
        assert_eq!(created.hash(), loaded.hash());
        assert_eq!(
            created.destination_hash(APP_NAME),
            loaded.destination_hash(APP_NAME)
        );
    }

    #[test]
    fn test_distinct_identities() {
        let a = NodeIdentity::load_or_create(TempDir::new().unwrap().path()).unwrap();
        let b = NodeIdentity::load_or_create(TempDir::new().unwrap().path()).unwrap();
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.destination_hash(APP_NAME), a.hash());
    }

    #[test]
    fn test_malformed_identity_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(IDENTITY_FILE), b"short").unwrap();
        let err = NodeIdentity::load_or_create(temp.path()).unwrap_err();
        assert!(matches!(err, IdentityError::Malformed { len: 5, .. }));
    }

    #[test]
    fn test_generated_keys_are_random() {
        let a = NodeIdentity::generate().unwrap();
        let b = NodeIdentity::generate().unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.key, [0u8; KEY_LEN]);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        NodeIdentity::load_or_create(temp.path()).unwrap();
        let mode = fs::metadata(temp.path().join(IDENTITY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_hash_hex_length() {
        let temp = TempDir::new().unwrap();
        let identity = NodeIdentity::load_or_create(temp.path()).unwrap();
        assert_eq!(identity.hash_hex().len(), HASH_LEN * 2);
    }
}
