#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;
use url::Url;

use super::codec::DEFAULT_NAMESPACE;
use crate::Result;
use crate::error::Error;
use crate::retry::RetryConfig;

const DEFAULT_PATH: &str = "/socket.io";
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
const ENGINE_IO_VERSION: &str = "4";

/// Configuration for the socket transport.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Server path the Socket.IO endpoint is mounted on
    #[builder(default = DEFAULT_PATH.to_owned(), into)]
    pub path: String,
    #[builder(default = DEFAULT_NAMESPACE.to_owned(), into)]
    pub namespace: String,
    /// Upper bound on WebSocket upgrade plus Engine.IO and Socket.IO handshakes
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT)]
    pub handshake_timeout: Duration,
    /// Automatic reconnection, used when the connection manager owns its policy
    #[builder(default)]
    pub reconnect: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Builds the WebSocket URL for `base`, e.g. `http://host:5000` becomes
    /// `ws://host:5000/socket.io/?EIO=4&transport=websocket`.
    pub fn socket_url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();

        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::validation(format!(
                    "unsupported scheme {other:?} for socket endpoint {base}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::validation(format!("cannot use scheme {scheme} for {base}")))?;

        let path = format!("{}/", self.path.trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", "websocket");

        Ok(url)
    }
}
