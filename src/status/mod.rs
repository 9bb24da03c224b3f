//! Backend liveness over plain HTTP.
//!
//! **Feature flag:** `status` (required to use this module)
//!
//! The socket can only tell whether the socket is up. [`StatusProber`] answers the
//! question the UI asks before offering the assistant at all: is the backend
//! reachable? It walks a cascade of increasingly forgiving endpoints and keeps a
//! small state machine:
//!
//! ```text
//! Unknown -> Checking -> Connected
//!                     -> Disconnected -> Checking ... -> Failed
//! Connected -> Checking        (recheck)
//! Failed    -> Checking        (manual retry)
//! ```

pub mod prober;

pub use prober::{Endpoint, ProbeConfig, ProbeState, StatusProber};
