//! HTTP client for the backend's REST endpoints.
//!
//! These endpoints are plain request/response and need no socket. The status
//! prober builds on the first three to decide whether the backend is reachable.
//!
//! ## Available Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/api/status` | GET | Primary liveness check |
//! | `/api/ping` | GET | Secondary liveness check |
//! | `/` | HEAD | Last-resort reachability check |
//! | `/api/health` | GET | Service health and configured assistant models |
//! | `/api/process_instructions` | POST | Translate an instruction into a shell command |
//! | `/api/files` | GET | List a directory of the user's workspace |
//! | `/api/file/delete` | POST | Delete a file or directory from the workspace |
//!
//! # Example
//!
//! ```no_run
//! use codestorm_bridge::api::{Client, types::FilesRequest};
//!
//! # async fn example() -> codestorm_bridge::Result<()> {
//! let client = Client::new("http://localhost:5000")?;
//!
//! let status = client.status().await?;
//! println!("backend is {}", status.status);
//!
//! let listing = client
//!     .files(&FilesRequest::builder().directory("src").build())
//!     .await?;
//! for entry in listing.files {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod types;

pub use client::Client;
