//! Typed errors for the boundaries that can fail outside the event loop.
//!
//! Everything inside the event loop is handled by closing the offending
//! connection and logging; nothing there propagates an error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bind address must start with ':', got {0:?}")]
    MissingColon(String),

    #[error("invalid port in bind address {0:?}")]
    InvalidPort(String),
}
