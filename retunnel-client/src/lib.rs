//! # retunnel-client
//!
//! The client half of a reverse-tunneling service: a long-lived agent
//! that authenticates to a gateway, requests public tunnels, and proxies
//! inbound requests to a local TCP service.
//!
//! [`Supervisor`] is the entry point: `Supervisor::start` connects,
//! authenticates (registering an anonymous account if no token exists
//! yet), and starts the background reconnect watcher. From there,
//! [`Supervisor::request_tunnel`] opens public tunnels and the
//! supervisor spawns a proxy session per inbound request automatically.
//!
//! This crate has no CLI, no config-file loader, and no terminal UI —
//! those are external collaborators. It reads configuration from
//! [`AgentConfig`] and persists its auth token through [`TokenStore`].

mod config;
mod control;
mod error;
mod http_framing;
mod proxy;
mod registrar;
mod token;
mod transport;
mod tunnel;

pub mod supervisor;

pub use config::{AgentConfig, AgentConfigBuilder, Protocol, TunnelConfig, DEFAULT_SERVER_ENDPOINT};
pub use control::{SessionEvent, TunnelGrant};
pub use error::{RetunnelError, Result};
pub use registrar::{ReactivateOutcome, RegistrarClient, RegistrationResult};
pub use supervisor::{ConnectionStatus, RequestLogEntry, Supervisor};
pub use token::TokenStore;
pub use tunnel::{ActiveTunnel, TunnelRegistry, TunnelStats};
