//! The client's error taxonomy.
//!
//! Each variant corresponds to one of the kinds in spec §7. Transport
//! failures on the control stream never reach a caller as an error value
//! — they trigger the reconnect loop instead (see `supervisor`) — so
//! `Connection` mostly surfaces from `RequestTunnel` on a disconnected
//! supervisor, or from a proxy session that only needs to fail locally.

use retunnel_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum RetunnelError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("registrar API error (status {status:?}): {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },
}

impl RetunnelError {
    pub fn connection(msg: impl Into<String>) -> Self {
        RetunnelError::Connection(msg.into())
    }

    pub fn tunnel(msg: impl Into<String>) -> Self {
        RetunnelError::Tunnel(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        RetunnelError::Proxy(msg.into())
    }
}

impl From<std::io::Error> for RetunnelError {
    fn from(e: std::io::Error) -> Self {
        RetunnelError::Connection(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RetunnelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RetunnelError::Connection(e.to_string())
    }
}

impl From<reqwest::Error> for RetunnelError {
    fn from(e: reqwest::Error) -> Self {
        RetunnelError::Api {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RetunnelError>;
