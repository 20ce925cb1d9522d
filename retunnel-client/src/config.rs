//! Agent configuration and the caller-supplied tunnel configuration.
//!
//! `AgentConfig` is the typed shape of what the external CLI/config-file
//! loader (out of scope for this crate) is expected to hand the core.
//! `AgentConfig::from_env` reads the environment variables spec §6 names;
//! `AgentConfig::builder` is for callers that already have the values.

use std::env;

use crate::error::{RetunnelError, Result};

const ENV_SERVER_ENDPOINT: &str = "RETUNNEL_SERVER_ENDPOINT";
const ENV_AUTH_TOKEN: &str = "RETUNNEL_AUTH_TOKEN";
const ENV_INSECURE: &str = "RETUNNEL_INSECURE";
const ENV_LOG_LEVEL: &str = "RETUNNEL_LOG_LEVEL";
const ENV_LOG_FILE: &str = "RETUNNEL_LOG_FILE";
const ENV_QUIET: &str = "RETUNNEL_QUIET";

pub const DEFAULT_SERVER_ENDPOINT: &str = "retunnel.net";

/// Configuration the core needs to reach the gateway and authenticate.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_endpoint: String,
    /// Takes precedence over whatever the token store holds, per spec §6.
    pub auth_token: Option<String>,
    pub verify_ssl: bool,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub quiet: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: DEFAULT_SERVER_ENDPOINT.to_owned(),
            auth_token: None,
            verify_ssl: true,
            log_level: None,
            log_file: None,
            quiet: false,
        }
    }
}

impl AgentConfig {
    /// Builds a config from the `RETUNNEL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var(ENV_SERVER_ENDPOINT) {
            config.server_endpoint = v;
        }
        if let Ok(v) = env::var(ENV_AUTH_TOKEN) {
            if !v.is_empty() {
                config.auth_token = Some(v);
            }
        }
        if let Ok(v) = env::var(ENV_INSECURE) {
            config.verify_ssl = !truthy(&v);
        }
        if let Ok(v) = env::var(ENV_LOG_LEVEL) {
            config.log_level = Some(v);
        }
        if let Ok(v) = env::var(ENV_LOG_FILE) {
            config.log_file = Some(v);
        }
        if let Ok(v) = env::var(ENV_QUIET) {
            config.quiet = truthy(&v);
        }
        config
    }

    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Whether the gateway endpoint should be treated as a local dev
    /// server (plaintext `ws://`, no TLS), per spec §6's scheme defaults.
    pub fn is_local_endpoint(&self) -> bool {
        self.server_endpoint.contains("localhost") || self.server_endpoint.contains("127.0.0.1")
    }
}

fn truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn server_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.server_endpoint = endpoint.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.config.verify_ssl = verify;
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}

/// Tunnel protocol requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Tcp,
}

impl Protocol {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
        }
    }
}

impl TryFrom<&str> for Protocol {
    type Error = RetunnelError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "http" => Ok(Protocol::Http),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(RetunnelError::Configuration(format!(
                "unsupported protocol: {other}"
            ))),
        }
    }
}

/// Caller-supplied configuration for a tunnel request.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub protocol: Protocol,
    pub local_port: u16,
    pub subdomain: Option<String>,
    pub hostname: Option<String>,
    pub http_auth: Option<String>,
    pub remote_port: Option<u16>,
    pub inspect: bool,
}

impl TunnelConfig {
    pub fn http(local_port: u16) -> Self {
        Self {
            protocol: Protocol::Http,
            local_port,
            subdomain: None,
            hostname: None,
            http_auth: None,
            remote_port: None,
            inspect: true,
        }
    }

    pub fn tcp(local_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            local_port,
            subdomain: None,
            hostname: None,
            http_auth: None,
            remote_port: None,
            inspect: true,
        }
    }

    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_rejects_unknown_values() {
        assert!(Protocol::try_from("http").is_ok());
        assert!(Protocol::try_from("tcp").is_ok());
        assert!(Protocol::try_from("ftp").is_err());
    }

    #[test]
    fn local_endpoint_detection() {
        let cfg = AgentConfig::builder().server_endpoint("localhost:6400").build();
        assert!(cfg.is_local_endpoint());
        let cfg = AgentConfig::builder().server_endpoint("retunnel.net").build();
        assert!(!cfg.is_local_endpoint());
    }

    #[test]
    fn insecure_env_var_flips_verify_ssl() {
        // Exercised indirectly: truthy() is the real unit under test here
        // since from_env() depends on process-global env state.
        assert!(truthy("1"));
        assert!(truthy("true"));
        assert!(!truthy("0"));
        assert!(!truthy(""));
    }
}
