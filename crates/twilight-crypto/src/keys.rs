//! Content/metadata key generation and AES-GCM key wrapping under the KEK

use aes::Aes256;
use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    AesGcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::Kek;
use crate::{KEY_SIZE, WRAP_IV_SIZE};

/// AES-256-GCM with a 128-bit nonce, the wrap format browser clients produce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            /// Build a key from a slice, rejecting anything but 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
                let bytes: [u8; KEY_SIZE] =
                    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                        expected: KEY_SIZE,
                        actual: bytes.len(),
                    })?;
                Ok(Self { bytes })
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// Content encryption key: AES-256-CTR over media bytes. Zeroized on drop.
    ContentKey
);

secret_key!(
    /// Metadata encryption key: AES-256-GCM over short strings. Zeroized on drop.
    MetadataKey
);

fn random_key() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a random 256-bit content encryption key.
pub fn generate_cek() -> ContentKey {
    ContentKey::from_bytes(random_key())
}

/// Generate a random 256-bit metadata encryption key.
pub fn generate_mek() -> MetadataKey {
    MetadataKey::from_bytes(random_key())
}

/// Raw key bytes encrypted under a KEK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Fresh random AES-GCM nonce for this wrap (unrelated to any counter block)
    pub iv: [u8; WRAP_IV_SIZE],
    /// Encrypted key bytes followed by the 16-byte GCM tag
    pub ciphertext: Vec<u8>,
}

/// Wrap (encrypt) raw key bytes under the KEK with AES-256-GCM.
pub fn wrap_key(kek: &Kek, key: &[u8; KEY_SIZE]) -> CryptoResult<WrappedKey> {
    let cipher = Aes256Gcm16::new(kek.as_bytes().into());

    let mut iv = [0u8; WRAP_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), key.as_ref())
        .map_err(|e| CryptoError::Cipher(format!("key wrapping failed: {e}")))?;

    Ok(WrappedKey { iv, ciphertext })
}

/// Unwrap (decrypt) key bytes with the KEK.
///
/// A tag mismatch means the password was wrong or the envelope was
/// corrupted; both surface as [`CryptoError::AuthenticationFailed`] and no
/// key material is returned.
pub fn unwrap_key(kek: &Kek, ciphertext: &[u8], iv: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    if iv.len() != WRAP_IV_SIZE {
        return Err(CryptoError::Encoding(format!(
            "wrap iv is {} bytes (expected {WRAP_IV_SIZE})",
            iv.len()
        )));
    }

    let cipher = Aes256Gcm16::new(kek.as_bytes().into());
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::<U16>::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)?,
    );

    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}
