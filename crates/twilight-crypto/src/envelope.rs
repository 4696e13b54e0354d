//! Password envelopes: sealing keys into a [`KeyRing`] and unlocking them.
//!
//! Both envelopes of a keyring share one salt, so a single Argon2id run
//! unlocks the whole keyring.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use twilight_core::types::{KeyKind, KeyRing, PasswordEncryptedKey};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_kek, generate_salt, KdfParams, Kek};
use crate::keys::{generate_mek, unwrap_key, wrap_key, ContentKey, MetadataKey};
use crate::{KEY_SIZE, MIN_PASSWORD_LEN, SALT_SIZE};

/// Keys recovered from a keyring
#[derive(Debug)]
pub struct UnlockedKeyring {
    pub cek: ContentKey,
    pub mek: MetadataKey,
    /// Set when the keyring had no MEK envelope: a fresh MEK was generated
    /// and sealed here. The caller must persist it.
    pub sealed_metadata_key: Option<PasswordEncryptedKey>,
}

fn encode_envelope(salt: &[u8; SALT_SIZE], kek: &Kek, key: &[u8; KEY_SIZE]) -> CryptoResult<PasswordEncryptedKey> {
    let wrapped = wrap_key(kek, key)?;
    Ok(PasswordEncryptedKey {
        salt: STANDARD.encode(salt),
        iv: STANDARD.encode(wrapped.iv),
        ciphertext: STANDARD.encode(&wrapped.ciphertext),
    })
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Encoding(format!("envelope {name}: {e}")))
}

fn decode_salt(envelope: &PasswordEncryptedKey) -> CryptoResult<[u8; SALT_SIZE]> {
    let salt = decode_field("salt", &envelope.salt)?;
    salt.as_slice().try_into().map_err(|_| {
        CryptoError::Encoding(format!("envelope salt is {} bytes (expected {SALT_SIZE})", salt.len()))
    })
}

fn open_with_kek(kek: &Kek, envelope: &PasswordEncryptedKey) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let iv = decode_field("iv", &envelope.iv)?;
    let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;
    unwrap_key(kek, &ciphertext, &iv)
}

/// Wrap `key` under a KEK derived from `password` and `salt`.
pub fn seal_password_envelope(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    key: &[u8; KEY_SIZE],
    params: &KdfParams,
) -> CryptoResult<PasswordEncryptedKey> {
    let kek = derive_kek(password, salt, params)?;
    encode_envelope(salt, &kek, key)
}

/// Seal both keys into a new keyring under one fresh salt.
pub fn seal_keyring(
    id: &str,
    password: &SecretString,
    cek: &ContentKey,
    mek: &MetadataKey,
    params: &KdfParams,
) -> CryptoResult<KeyRing> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(CryptoError::PasswordTooShort { min: MIN_PASSWORD_LEN });
    }

    let salt = generate_salt();
    let kek = derive_kek(password, &salt, params)?;

    let mut ring = KeyRing::new(id);
    ring.set_envelope(KeyKind::Content, encode_envelope(&salt, &kek, cek.as_bytes())?);
    ring.set_envelope(KeyKind::Metadata, encode_envelope(&salt, &kek, mek.as_bytes())?);

    info!(keyring = id, "sealed new keyring");
    Ok(ring)
}

/// Recover the CEK and MEK from a keyring.
///
/// A wrong password fails with [`CryptoError::AuthenticationFailed`]. It is
/// never treated as "no keys yet".
pub fn unlock_keyring(
    ring: &KeyRing,
    password: &SecretString,
    params: &KdfParams,
) -> CryptoResult<UnlockedKeyring> {
    let cek_envelope = ring
        .envelope(KeyKind::Content)
        .ok_or(CryptoError::MissingEnvelope(KeyKind::Content))?;

    let salt = decode_salt(cek_envelope)?;
    let kek = derive_kek(password, &salt, params)?;
    let cek = ContentKey::from_bytes(*open_with_kek(&kek, cek_envelope)?);

    let (mek, sealed_metadata_key) = match ring.envelope(KeyKind::Metadata) {
        Some(envelope) => {
            let mek_salt = decode_salt(envelope)?;
            let bytes = if mek_salt == salt {
                open_with_kek(&kek, envelope)?
            } else {
                debug!(keyring = %ring.id, "metadata envelope has its own salt");
                let mek_kek = derive_kek(password, &mek_salt, params)?;
                open_with_kek(&mek_kek, envelope)?
            };
            (MetadataKey::from_bytes(*bytes), None)
        }
        None => {
            info!(keyring = %ring.id, "keyring has no metadata key; generating one");
            let mek = generate_mek();
            let envelope = encode_envelope(&salt, &kek, mek.as_bytes())?;
            (mek, Some(envelope))
        }
    };

    Ok(UnlockedKeyring {
        cek,
        mek,
        sealed_metadata_key,
    })
}
