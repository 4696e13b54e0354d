use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Argon2id rejected its parameters or failed to run (e.g. out of memory).
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// AEAD tag did not verify. Usually a wrong password or damaged envelope.
    #[error("authentication failed: incorrect password or corrupted data")]
    AuthenticationFailed,

    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid JWK: {0}")]
    InvalidJwk(String),

    #[error("keyring has no {0} envelope")]
    MissingEnvelope(twilight_core::types::KeyKind),

    #[error("password too short: minimum {min} characters")]
    PasswordTooShort { min: usize },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("stream offset {0} is not aligned to the 16-byte block size")]
    UnalignedOffset(u64),

    #[error("stream already closed")]
    StreamClosed,

    #[error("cipher error: {0}")]
    Cipher(String),

    /// The byte source feeding a stream adaptor failed.
    #[error("stream source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}
