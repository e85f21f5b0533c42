//! Library crate backing the `patchpanel` binary, split out so integration
//! tests can drive the relay directly against real loopback sockets.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod duration;
pub mod error;
pub mod link;
pub mod logging;
pub mod relay;
pub mod slots;
pub mod stream;

pub use error::ConfigError;
pub use relay::Relay;
