//! Counter block arithmetic for AES-CTR.
//!
//! Counter block layout (16 bytes):
//! ```text
//! [0..8]  random nonce, fixed for the lifetime of one encrypted object
//! [8..16] big-endian u64 counter, zero at generation, + block index per block
//! ```
//!
//! The counter half wraps modulo 2^64 and never carries into the nonce. This
//! is the `length: 64` convention of WebCrypto AES-CTR and of
//! `ctr::Ctr64BE`. Any deviation produces a wrong keystream with no error.

use rand::RngCore;

use crate::BLOCK_SIZE;

const NONCE_LEN: usize = 8;

/// Compute the counter block for the AES block containing `byte_offset`.
pub fn counter_at(base: &[u8; BLOCK_SIZE], byte_offset: u64) -> [u8; BLOCK_SIZE] {
    let block_index = byte_offset / BLOCK_SIZE as u64;

    let mut low = [0u8; 8];
    low.copy_from_slice(&base[NONCE_LEN..]);
    let counter = u64::from_be_bytes(low).wrapping_add(block_index);

    let mut block = *base;
    block[NONCE_LEN..].copy_from_slice(&counter.to_be_bytes());
    block
}

/// The per-object base counter block, written as the 16-byte header of the
/// encrypted wire form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CounterBlock([u8; BLOCK_SIZE]);

impl CounterBlock {
    /// Fresh random nonce in the high half, zero counter in the low half.
    pub fn generate() -> Self {
        let mut block = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut block[..NONCE_LEN]);
        Self(block)
    }

    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    /// High 64 bits
    pub fn nonce(&self) -> u64 {
        let mut hi = [0u8; 8];
        hi.copy_from_slice(&self.0[..NONCE_LEN]);
        u64::from_be_bytes(hi)
    }

    /// Low 64 bits
    pub fn counter(&self) -> u64 {
        let mut lo = [0u8; 8];
        lo.copy_from_slice(&self.0[NONCE_LEN..]);
        u64::from_be_bytes(lo)
    }

    /// Counter block for the AES block containing `byte_offset`.
    pub fn at(&self, byte_offset: u64) -> Self {
        Self(counter_at(&self.0, byte_offset))
    }
}

impl std::fmt::Debug for CounterBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CounterBlock({:016x}:{:016x})", self.nonce(), self.counter())
    }
}
