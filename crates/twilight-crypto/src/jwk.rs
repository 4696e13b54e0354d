//! JWK import/export for raw AES keys
//!
//! Keys travel to the decrypting proxy as `oct` JWKs, the form a browser's
//! `crypto.subtle.exportKey("jwk", ..)` produces.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use twilight_core::types::Jwk;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{ContentKey, MetadataKey};
use crate::KEY_SIZE;

const KTY_OCT: &str = "oct";
const ALG_CTR: &str = "A256CTR";
const ALG_GCM: &str = "A256GCM";

fn export(bytes: &[u8; KEY_SIZE], alg: &str) -> Jwk {
    Jwk {
        kty: KTY_OCT.to_string(),
        k: URL_SAFE_NO_PAD.encode(bytes),
        alg: Some(alg.to_string()),
        ext: Some(true),
        key_ops: vec!["encrypt".to_string(), "decrypt".to_string()],
    }
}

fn import(jwk: &Jwk, alg: &str) -> CryptoResult<Vec<u8>> {
    if jwk.kty != KTY_OCT {
        return Err(CryptoError::InvalidJwk(format!("kty must be \"oct\", got {:?}", jwk.kty)));
    }
    if let Some(found) = jwk.alg.as_deref() {
        if found != alg {
            return Err(CryptoError::InvalidJwk(format!("alg must be {alg}, got {found}")));
        }
    }
    URL_SAFE_NO_PAD
        .decode(jwk.k.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidJwk(format!("k is not base64url: {e}")))
}

impl ContentKey {
    pub fn to_jwk(&self) -> Jwk {
        export(self.as_bytes(), ALG_CTR)
    }

    /// Import a content key. `alg` may be absent, but if present must be A256CTR.
    pub fn from_jwk(jwk: &Jwk) -> CryptoResult<Self> {
        let bytes = zeroize::Zeroizing::new(import(jwk, ALG_CTR)?);
        Self::from_slice(&bytes)
    }
}

impl MetadataKey {
    pub fn to_jwk(&self) -> Jwk {
        export(self.as_bytes(), ALG_GCM)
    }

    pub fn from_jwk(jwk: &Jwk) -> CryptoResult<Self> {
        let bytes = zeroize::Zeroizing::new(import(jwk, ALG_GCM)?);
        Self::from_slice(&bytes)
    }
}
