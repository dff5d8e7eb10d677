//! Parameters for opening a transport.

use url::Url;

use crate::TransportError;

/// Protocol version advertised to the service.
const PROTOCOL_VERSION: &str = "1.0";

/// Everything a transport needs to reach the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// Realtime host, e.g. `realtime.example.com`.
    pub host: String,
    /// `wss` when true, `ws` otherwise.
    pub tls: bool,
    /// Explicit port; the scheme default when `None`.
    pub port: Option<u16>,
    /// Selects `format=msgpack` (binary frames) over `format=json`.
    pub use_binary_protocol: bool,
    /// API key sent as the `key` query parameter.
    pub key: Option<String>,
    /// Key of a previous connection to resume.
    pub connection_key: Option<String>,
}

impl TransportParams {
    /// Creates params for `host` with TLS on and the binary protocol.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tls: true,
            port: None,
            use_binary_protocol: true,
            key: None,
            connection_key: None,
        }
    }

    /// Builds the endpoint URL with the query the service expects.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidEndpoint`] if the host does not
    /// form a valid URL.
    pub fn url(&self) -> Result<Url, TransportError> {
        let scheme = if self.tls { "wss" } else { "ws" };
        let authority = match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        };
        let mut url = Url::parse(&format!("{scheme}://{authority}/"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("v", PROTOCOL_VERSION);
            query.append_pair(
                "format",
                if self.use_binary_protocol { "msgpack" } else { "json" },
            );
            if let Some(key) = &self.key {
                query.append_pair("key", key);
            }
            if let Some(resume) = &self.connection_key {
                query.append_pair("resume", resume);
            }
        }
        Ok(url)
    }
}
