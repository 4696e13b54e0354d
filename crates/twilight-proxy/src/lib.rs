//! twilight-proxy: decrypting media proxy
//!
//! A media player asks for plaintext segments under a virtual path; the
//! proxy resolves a signed URL for the encrypted object, fetches it, and
//! streams it back decrypted with the session's content key. The key gets
//! there through a handshake message from the page that unlocked it.

pub mod error;
pub mod handshake;
pub mod media;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use error::{ProxyError, ProxyResult};
pub use registry::KeyRegistry;
pub use resolver::{ApiSignedUrlResolver, SignedUrlResolver};
pub use router::{RouteOutcome, VirtualRouter};
pub use server::build_app;
pub use session::SessionId;
pub use state::AppState;
