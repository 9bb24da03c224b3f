//! Socket.IO transport over WebSocket.
//!
//! # Architecture
//!
//! - [`codec`]: Engine.IO v4 / Socket.IO v5 text framing
//! - [`ConnectionManager`]: connection lifecycle with heartbeat watchdog and reconnection
//! - [`Transport`]: the seam the request layer in [`crate::bridge`] is written against

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, Event};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
