pub mod config;
pub mod error;
pub mod keyring;
pub mod types;

pub use error::{TwilightError, TwilightResult};
