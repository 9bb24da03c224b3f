//! Request/response bridge over the Socket.IO connection.
//!
//! **Feature flag:** `ws` (required to use this module)
//!
//! The server speaks in events, not calls: a `bash_command` is answered at some
//! later point by a `command_result`. This module turns that into awaitable calls:
//!
//! - [`Correlator`](correlator::Correlator) registers each request under its
//!   response event with a unique `request_id`, and settles it by response,
//!   timeout or cancellation exactly once
//! - [`CommandQueue`](queue::CommandQueue) holds commands submitted while
//!   disconnected and flushes them in submission order on connect
//! - [`Bridge`] ties both to a [`ConnectionManager`](crate::ws::ConnectionManager)
//!   and exposes the typed calls
//!
//! ## Events
//!
//! | Request | Response | Default timeout | Queued while disconnected |
//! |---------|----------|-----------------|---------------------------|
//! | `bash_command` | `command_result` | 10 s | yes |
//! | `natural_language` | `assistant_response` | 30 s | no |
//! | `execute_command` | `command_result` | 10 s | no |
//! | `join_workspace` | none | none | no |
//!
//! Unsolicited `file_change`, `file_sync` and `command_executed` events are
//! available through [`Bridge::notifications`].
//!
//! # Example
//!
//! ```no_run
//! use codestorm_bridge::bridge::{Bridge, CallOptions, Config};
//!
//! # async fn example() -> codestorm_bridge::Result<()> {
//! let config = Config::builder().workspace_id("alice").build();
//! let bridge = Bridge::new("http://localhost:5000", config)?;
//!
//! // Queued until the connection is up
//! let listing = bridge.send_command("ls", &CallOptions::default()).await?;
//!
//! let answer = bridge
//!     .process_natural_language("create an index.html", &CallOptions::default())
//!     .await?;
//! println!("{:?} {:?}", listing.output, answer.message);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod correlator;
#[cfg(test)]
pub(crate) mod fake;
pub mod queue;
pub mod types;

pub use client::{Bridge, CallOptions, Config};
pub use correlator::{Correlator, PendingResponse};
pub use queue::CommandQueue;
