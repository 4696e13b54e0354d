//! twilight-crypto: Client-side E2E encryption for the Twilight video library
//!
//! Key hierarchy:
//! ```text
//! Password + salt ──Argon2id──▶ KEK (transient, wrap/unwrap only)
//!   ├── CEK (random 256-bit, wrapped by KEK with AES-256-GCM)
//!   │   └── Media: AES-256-CTR, wire form = [16-byte counter block][ciphertext]
//!   └── MEK (random 256-bit, wrapped by KEK with AES-256-GCM)
//!       └── Metadata strings: AES-256-GCM, base64(nonce || ciphertext || tag)
//! ```
//!
//! The media stream is deliberately unauthenticated: counter mode gives
//! random access and constant-size output, and integrity is left to the
//! transport and storage layers.

pub mod counter;
pub mod envelope;
pub mod error;
pub mod jwk;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod stream;

pub use counter::{counter_at, CounterBlock};
pub use envelope::{seal_keyring, seal_password_envelope, unlock_keyring, UnlockedKeyring};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_kek, generate_salt, KdfParams, Kek};
pub use keys::{generate_cek, generate_mek, unwrap_key, wrap_key, ContentKey, MetadataKey, WrappedKey};
pub use metadata::{decrypt_metadata, encrypt_metadata};
pub use stream::{DecryptStream, DecryptTransform, EncryptStream, EncryptTransform, StreamState};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the Argon2id salt persisted with each envelope
pub const SALT_SIZE: usize = 16;

/// Size of the AES-GCM nonce used when wrapping keys
pub const WRAP_IV_SIZE: usize = 16;

/// AES block size, and the size of the counter block header
pub const BLOCK_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Minimum password length accepted when sealing a new keyring
pub const MIN_PASSWORD_LEN: usize = 8;
