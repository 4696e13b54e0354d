use serde::{Deserialize, Serialize};

/// A password-wrapped key as persisted in the keyring.
///
/// All three fields are standard base64. `salt` feeds the Argon2id KDF,
/// `iv` is the AES-GCM nonce of the wrap, `ciphertext` carries the GCM tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEncryptedKey {
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
}

/// Per-user keyring document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRing {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_encrypted_key: Option<PasswordEncryptedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_encrypted_metadata_key: Option<PasswordEncryptedKey>,
}

impl KeyRing {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn envelope(&self, kind: KeyKind) -> Option<&PasswordEncryptedKey> {
        match kind {
            KeyKind::Content => self.password_encrypted_key.as_ref(),
            KeyKind::Metadata => self.password_encrypted_metadata_key.as_ref(),
        }
    }

    pub fn set_envelope(&mut self, kind: KeyKind, envelope: PasswordEncryptedKey) {
        match kind {
            KeyKind::Content => self.password_encrypted_key = Some(envelope),
            KeyKind::Metadata => self.password_encrypted_metadata_key = Some(envelope),
        }
    }
}

/// Which key an envelope wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Content encryption key (media, AES-256-CTR)
    #[serde(rename = "CEK")]
    Content,
    /// Metadata encryption key (short strings, AES-256-GCM)
    #[serde(rename = "MEK")]
    Metadata,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Content => f.write_str("CEK"),
            KeyKind::Metadata => f.write_str("MEK"),
        }
    }
}

/// JSON Web Key (symmetric `oct` keys only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    /// Key bytes, base64url without padding
    pub k: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
}

/// Message a page sends to the decrypting proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Install the content key for the sender's session
    #[serde(rename = "SET_KEY")]
    SetKey { key: Jwk },
    /// Forget the sender's content key
    #[serde(rename = "CLEAR_KEY")]
    ClearKey,
}

/// Body returned by the signed-URL API: `{ url }` on success, `{ error }` otherwise
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignedUrlResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
