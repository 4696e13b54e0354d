//! Chunk-boundary-agnostic AES-256-CTR stream encryption.
//!
//! Wire form of an encrypted object:
//! ```text
//! [16 bytes: counter block][N bytes: ciphertext]   (N == plaintext length)
//! ```
//!
//! Both transforms buffer at most 15 bytes between pushes: every push emits
//! the largest 16-byte-aligned prefix of what has accumulated, encrypted at
//! `counter_at(base, bytes_processed)`. The final partial block is handled
//! on `finish`. Output is therefore independent of how the caller split the
//! input.
//!
//! [`EncryptStream`] and [`DecryptStream`] adapt the transforms to
//! `futures::Stream` sources. They are pull-based: a chunk is read from the
//! source only when the consumer asks for output, so a slow consumer
//! throttles the source.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use aes::Aes256;
use bytes::Bytes;
use ctr::cipher::{KeyIvInit, StreamCipher};
use futures::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::counter::CounterBlock;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::ContentKey;
use crate::BLOCK_SIZE;

/// AES-256-CTR with a 64-bit big-endian counter in the low half of the block.
type Aes256Ctr64BE = ctr::Ctr64BE<Aes256>;

/// Externally visible transform state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Decrypt only: collecting the 16-byte counter block header
    AwaitingHeader,
    /// Accepting input; 0..=15 bytes may be held back
    Buffering,
    /// Flushed, cancelled, or failed; no further output
    Closed,
}

/// XOR `data` with the keystream starting at the block-aligned `offset`.
fn apply_keystream(key: &ContentKey, base: &CounterBlock, offset: u64, data: &mut [u8]) {
    debug_assert_eq!(offset % BLOCK_SIZE as u64, 0);
    let counter = base.at(offset);
    let mut cipher = Aes256Ctr64BE::new(key.as_bytes().into(), counter.as_bytes().into());
    cipher.apply_keystream(data);
}

/// Holds back the unaligned tail and tracks the cumulative byte offset.
#[derive(Default)]
struct BlockBuffer {
    pending: Vec<u8>,
    offset: u64,
}

impl BlockBuffer {
    fn starting_at(offset: u64) -> Self {
        Self {
            pending: Vec::with_capacity(BLOCK_SIZE),
            offset,
        }
    }

    fn absorb(&mut self, key: &ContentKey, base: &CounterBlock, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);

        let aligned = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if aligned == 0 {
            return Vec::new();
        }

        let tail = self.pending.split_off(aligned);
        let mut out = std::mem::replace(&mut self.pending, tail);
        apply_keystream(key, base, self.offset, &mut out);
        self.offset += aligned as u64;
        out
    }

    /// Process the 0..=15 remaining bytes as a final partial block.
    fn drain_tail(&mut self, key: &ContentKey, base: &CounterBlock) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.pending);
        if !out.is_empty() {
            apply_keystream(key, base, self.offset, &mut out);
            self.offset += out.len() as u64;
        }
        out
    }
}

// ── Encrypt ──────────────────────────────────────────────────────────────────

/// Plaintext → ciphertext transform. The caller writes
/// [`EncryptTransform::counter_block`] ahead of the emitted bytes.
pub struct EncryptTransform {
    key: ContentKey,
    counter_block: CounterBlock,
    buffer: BlockBuffer,
    closed: bool,
}

impl EncryptTransform {
    /// Start a new object under a freshly generated counter block.
    pub fn new(key: ContentKey) -> Self {
        Self::with_counter_block(key, CounterBlock::generate())
    }

    /// Encrypt under a caller-supplied counter block.
    ///
    /// The same (key, counter block) pair must never encrypt two different
    /// plaintexts.
    pub fn with_counter_block(key: ContentKey, counter_block: CounterBlock) -> Self {
        Self {
            key,
            counter_block,
            buffer: BlockBuffer::starting_at(0),
            closed: false,
        }
    }

    /// Continue an object at plaintext `offset`, which must be block aligned.
    pub fn resume(key: ContentKey, counter_block: CounterBlock, offset: u64) -> CryptoResult<Self> {
        if offset % BLOCK_SIZE as u64 != 0 {
            return Err(CryptoError::UnalignedOffset(offset));
        }
        Ok(Self {
            key,
            counter_block,
            buffer: BlockBuffer::starting_at(offset),
            closed: false,
        })
    }

    pub fn counter_block(&self) -> CounterBlock {
        self.counter_block
    }

    /// Plaintext bytes consumed so far, including any held-back tail.
    pub fn bytes_consumed(&self) -> u64 {
        self.buffer.offset + self.buffer.pending.len() as u64
    }

    pub fn state(&self) -> StreamState {
        if self.closed {
            StreamState::Closed
        } else {
            StreamState::Buffering
        }
    }

    /// Feed a plaintext chunk; returns whatever ciphertext is ready.
    pub fn push(&mut self, chunk: &[u8]) -> CryptoResult<Vec<u8>> {
        if self.closed {
            return Err(CryptoError::StreamClosed);
        }
        Ok(self.buffer.absorb(&self.key, &self.counter_block, chunk))
    }

    /// Encrypt the held-back tail and close the transform.
    pub fn finish(&mut self) -> CryptoResult<Vec<u8>> {
        if self.closed {
            return Err(CryptoError::StreamClosed);
        }
        self.closed = true;
        let out = self.buffer.drain_tail(&self.key, &self.counter_block);
        debug!(bytes = self.buffer.offset, "encrypt transform finished");
        Ok(out)
    }
}

// ── Decrypt ──────────────────────────────────────────────────────────────────

enum Phase {
    AwaitingHeader(Vec<u8>),
    Buffering {
        base: CounterBlock,
        buffer: BlockBuffer,
    },
    Closed {
        truncated: bool,
    },
}

/// Wire form → plaintext transform.
///
/// The first 16 bytes are taken as the counter block no matter how they are
/// split across pushes. If the source ends before the header is complete,
/// [`DecryptTransform::finish`] yields empty output without an error and
/// [`DecryptTransform::is_truncated`] turns true.
pub struct DecryptTransform {
    key: ContentKey,
    phase: Phase,
}

impl DecryptTransform {
    pub fn new(key: ContentKey) -> Self {
        Self {
            key,
            phase: Phase::AwaitingHeader(Vec::with_capacity(BLOCK_SIZE)),
        }
    }

    pub fn state(&self) -> StreamState {
        match self.phase {
            Phase::AwaitingHeader(_) => StreamState::AwaitingHeader,
            Phase::Buffering { .. } => StreamState::Buffering,
            Phase::Closed { .. } => StreamState::Closed,
        }
    }

    /// The counter block, once the header has been read.
    pub fn counter_block(&self) -> Option<CounterBlock> {
        match &self.phase {
            Phase::Buffering { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// True when the stream closed before a full header arrived.
    pub fn is_truncated(&self) -> bool {
        matches!(self.phase, Phase::Closed { truncated: true })
    }

    /// Feed a chunk of the wire form; returns whatever plaintext is ready.
    pub fn push(&mut self, chunk: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut rest = chunk;
        loop {
            match &mut self.phase {
                Phase::AwaitingHeader(header) => {
                    let take = (BLOCK_SIZE - header.len()).min(rest.len());
                    header.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if header.len() < BLOCK_SIZE {
                        return Ok(Vec::new());
                    }

                    let mut bytes = [0u8; BLOCK_SIZE];
                    bytes.copy_from_slice(header);
                    self.phase = Phase::Buffering {
                        base: CounterBlock::from_bytes(bytes),
                        buffer: BlockBuffer::starting_at(0),
                    };
                }
                Phase::Buffering { base, buffer } => {
                    return Ok(buffer.absorb(&self.key, base, rest));
                }
                Phase::Closed { .. } => return Err(CryptoError::StreamClosed),
            }
        }
    }

    /// Decrypt the held-back tail and close the transform.
    pub fn finish(&mut self) -> CryptoResult<Vec<u8>> {
        match std::mem::replace(&mut self.phase, Phase::Closed { truncated: false }) {
            Phase::AwaitingHeader(header) => {
                warn!(
                    received = header.len(),
                    "source ended before the 16-byte counter block; yielding empty plaintext"
                );
                self.phase = Phase::Closed { truncated: true };
                Ok(Vec::new())
            }
            Phase::Buffering { base, mut buffer } => {
                let out = buffer.drain_tail(&self.key, &base);
                debug!(bytes = buffer.offset, "decrypt transform finished");
                Ok(out)
            }
            closed @ Phase::Closed { .. } => {
                self.phase = closed;
                Err(CryptoError::StreamClosed)
            }
        }
    }

    fn abort(&mut self) {
        if !matches!(self.phase, Phase::Closed { .. }) {
            self.phase = Phase::Closed { truncated: false };
        }
    }
}

// ── Stream adaptors ──────────────────────────────────────────────────────────

trait BlockTransform {
    fn push_chunk(&mut self, chunk: &[u8]) -> CryptoResult<Vec<u8>>;
    fn finish_stream(&mut self) -> CryptoResult<Vec<u8>>;
    fn abort(&mut self);
}

impl BlockTransform for EncryptTransform {
    fn push_chunk(&mut self, chunk: &[u8]) -> CryptoResult<Vec<u8>> {
        self.push(chunk)
    }

    fn finish_stream(&mut self) -> CryptoResult<Vec<u8>> {
        self.finish()
    }

    fn abort(&mut self) {
        self.closed = true;
    }
}

impl BlockTransform for DecryptTransform {
    fn push_chunk(&mut self, chunk: &[u8]) -> CryptoResult<Vec<u8>> {
        self.push(chunk)
    }

    fn finish_stream(&mut self) -> CryptoResult<Vec<u8>> {
        self.finish()
    }

    fn abort(&mut self) {
        DecryptTransform::abort(self);
    }
}

/// Source, transform and cancellation shared by both adaptors.
struct Pipeline<S, X> {
    source: Option<Pin<Box<S>>>,
    transform: X,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl<S, T, E, X> Pipeline<S, X>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
    X: BlockTransform,
{
    fn new(source: S, transform: X) -> Self {
        Self {
            source: Some(Box::pin(source)),
            transform,
            cancelled: None,
        }
    }

    fn poll_pipeline(&mut self, cx: &mut Context<'_>) -> Poll<Option<CryptoResult<Bytes>>> {
        loop {
            if let Some(cancelled) = self.cancelled.as_mut() {
                if cancelled.as_mut().poll(cx).is_ready() {
                    self.cancelled = None;
                    if self.source.take().is_some() {
                        debug!("stream cancelled; upstream source released");
                    }
                    self.transform.abort();
                    return Poll::Ready(None);
                }
            }

            let Some(source) = self.source.as_mut() else {
                return Poll::Ready(None);
            };

            match source.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => match self.transform.push_chunk(chunk.as_ref()) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Poll::Ready(Some(Ok(Bytes::from(out)))),
                    Err(e) => {
                        self.source = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    self.source = None;
                    self.transform.abort();
                    return Poll::Ready(Some(Err(CryptoError::Source(e.into()))));
                }
                Poll::Ready(None) => {
                    self.source = None;
                    return match self.transform.finish_stream() {
                        Ok(out) if out.is_empty() => Poll::Ready(None),
                        Ok(out) => Poll::Ready(Some(Ok(Bytes::from(out)))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

/// Encrypts a plaintext byte stream into the full wire form: the counter
/// block header first, then ciphertext.
pub struct EncryptStream<S> {
    header: Option<Bytes>,
    pipeline: Pipeline<S, EncryptTransform>,
}

impl<S, T, E> EncryptStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(key: ContentKey, source: S) -> Self {
        Self::with_transform(EncryptTransform::new(key), source)
    }

    pub fn with_transform(transform: EncryptTransform, source: S) -> Self {
        Self {
            header: Some(Bytes::copy_from_slice(transform.counter_block().as_bytes())),
            pipeline: Pipeline::new(source, transform),
        }
    }

    /// End the stream early, dropping the source, once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.pipeline.cancelled = Some(Box::pin(token.cancelled_owned()));
        self
    }

    pub fn counter_block(&self) -> CounterBlock {
        self.pipeline.transform.counter_block()
    }
}

impl<S, T, E> Stream for EncryptStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    type Item = CryptoResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(header) = this.header.take() {
            return Poll::Ready(Some(Ok(header)));
        }
        this.pipeline.poll_pipeline(cx)
    }
}

/// Decrypts a wire-form byte stream into plaintext.
///
/// Dropping the stream drops the source. With a cancellation token attached,
/// cancelling it interrupts a pending pull, releases the source, and ends
/// the stream with no further output.
pub struct DecryptStream<S> {
    pipeline: Pipeline<S, DecryptTransform>,
}

impl<S, T, E> DecryptStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(key: ContentKey, source: S) -> Self {
        Self {
            pipeline: Pipeline::new(source, DecryptTransform::new(key)),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.pipeline.cancelled = Some(Box::pin(token.cancelled_owned()));
        self
    }

    pub fn state(&self) -> StreamState {
        self.pipeline.transform.state()
    }

    pub fn is_truncated(&self) -> bool {
        self.pipeline.transform.is_truncated()
    }
}

impl<S, T, E> Stream for DecryptStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    type Item = CryptoResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().pipeline.poll_pipeline(cx)
    }
}
