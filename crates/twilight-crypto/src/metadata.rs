//! Metadata string encryption under the MEK.
//!
//! Text form: standard base64 of `nonce (12) || ciphertext || tag (16)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::MetadataKey;
use crate::TAG_SIZE;

const NONCE_SIZE: usize = 12;

/// Encrypt a short string (a title, a filename) under the MEK.
pub fn encrypt_metadata(mek: &MetadataKey, plaintext: &str) -> CryptoResult<String> {
    let cipher = Aes256Gcm::new(mek.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| CryptoError::Cipher(format!("metadata encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

pub fn decrypt_metadata(mek: &MetadataKey, encoded: &str) -> CryptoResult<String> {
    let blob = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Encoding(format!("metadata is not base64: {e}")))?;
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Encoding(format!(
            "metadata blob too short: {} bytes",
            blob.len()
        )));
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(mek.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding(format!("metadata is not UTF-8: {e}")))
}
