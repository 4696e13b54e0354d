//! Keyring persistence: one document per user holding the password-wrapped
//! content and metadata keys.
//!
//! The store never sees key material in cleartext. It only persists the
//! `{salt, iv, ciphertext}` envelopes produced by `twilight-crypto`.
//!
//! `JsonKeyringStore` keeps every keyring in a single JSON file, rewritten
//! atomically (temp file, then rename) on each save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{TwilightError, TwilightResult};
use crate::types::{KeyKind, KeyRing, PasswordEncryptedKey};

/// Backing store for per-user keyrings
pub trait KeyringStore {
    /// Fetch the keyring for `user_id`. `None` means the user never set up keys.
    fn load(&self, user_id: &str) -> TwilightResult<Option<KeyRing>>;

    /// Upsert one envelope into the user's keyring.
    fn save_envelope(
        &mut self,
        user_id: &str,
        kind: KeyKind,
        envelope: PasswordEncryptedKey,
    ) -> TwilightResult<()>;
}

/// Keyring store persisted to a JSON file
pub struct JsonKeyringStore {
    path: PathBuf,
    rings: HashMap<String, KeyRing>,
}

impl JsonKeyringStore {
    /// Load or create a keyring store at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> TwilightResult<Self> {
        let rings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                TwilightError::Keyring(format!("parsing keyring store {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            rings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    fn flush(&self) -> TwilightResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.rings)?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), users = self.rings.len(), "keyring store flushed");
        Ok(())
    }
}

impl KeyringStore for JsonKeyringStore {
    fn load(&self, user_id: &str) -> TwilightResult<Option<KeyRing>> {
        Ok(self.rings.get(user_id).cloned())
    }

    fn save_envelope(
        &mut self,
        user_id: &str,
        kind: KeyKind,
        envelope: PasswordEncryptedKey,
    ) -> TwilightResult<()> {
        self.rings
            .entry(user_id.to_string())
            .or_insert_with(|| KeyRing::new(user_id))
            .set_envelope(kind, envelope);
        self.flush()
    }
}
