//! Supervisor (component C9): the public API surface. Owns the control
//! session, drives the reconnect loop, re-requests tunnels after a
//! reconnect, and records recent requests for `GetRequests`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AgentConfig, TunnelConfig};
use crate::control::{ControlSession, SessionEvent};
use crate::error::{RetunnelError, Result};
use crate::registrar::RegistrarClient;
use crate::token::TokenStore;
use crate::tunnel::{ActiveTunnel, TunnelRegistry};

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting { reason: String },
}

/// One entry in the recent-request log drained by `get_requests`.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub tunnel_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Cheaply `Clone`-able handle onto the supervisor's recent-request log, so
/// a spawned proxy-session task can append to it without holding a
/// reference to the `Supervisor` itself.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<RwLock<Vec<RequestLogEntry>>>);

impl RequestLog {
    pub async fn record(&self, entry: RequestLogEntry) {
        self.0.write().await.push(entry);
    }

    async fn drain(&self) -> Vec<RequestLogEntry> {
        std::mem::take(&mut *self.0.write().await)
    }
}

struct State {
    control: Option<ControlSession>,
    status: ConnectionStatus,
    running: bool,
    reconnect_task: Option<JoinHandle<()>>,
}

/// Owns everything needed to (re)establish a control session and is
/// cheaply `Arc`-cloned so the reconnect loop and proxy-session spawner
/// can share it without borrowing the supervisor itself.
struct Collaborators {
    config: AgentConfig,
    token_store: TokenStore,
    registrar: RegistrarClient,
}

pub struct Supervisor {
    collaborators: Arc<Collaborators>,
    state: Arc<Mutex<State>>,
    registry: TunnelRegistry,
    requests: RequestLog,
    client_id: Arc<RwLock<String>>,
}

impl Supervisor {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let registrar = RegistrarClient::new(registrar_base_url(&config), config.verify_ssl)?;
        Ok(Self {
            collaborators: Arc::new(Collaborators {
                config,
                token_store: TokenStore::new(),
                registrar,
            }),
            state: Arc::new(Mutex::new(State {
                control: None,
                status: ConnectionStatus::Disconnected,
                running: false,
                reconnect_task: None,
            })),
            registry: TunnelRegistry::new(),
            requests: RequestLog::default(),
            client_id: Arc::new(RwLock::new(String::new())),
        })
    }

    /// Builds a supervisor, connects it, and starts its reconnect watcher
    /// as a background task — the entry point external callers (the CLI
    /// collaborator) are expected to use.
    pub async fn start(config: AgentConfig) -> Result<Arc<Self>> {
        let supervisor = Arc::new(Self::new(config)?);
        supervisor.connect().await?;

        let watcher = supervisor.clone();
        let handle = tokio::spawn(async move {
            watcher.watch_and_reconnect().await;
        });
        supervisor.state.lock().await.reconnect_task = Some(handle);

        Ok(supervisor)
    }

    /// Establishes the first control session. Marks the supervisor
    /// "running" so that any later fatal error drives the reconnect loop
    /// instead of surfacing here.
    pub async fn connect(&self) -> Result<()> {
        let (events_tx, events_rx) = mpsc::channel(32);
        let session = ControlSession::establish(
            &self.collaborators.config,
            &self.collaborators.token_store,
            &self.collaborators.registrar,
            events_tx,
        )
        .await?;

        *self.client_id.write().await = session.client_id().await;

        let mut state = self.state.lock().await;
        state.control = Some(session);
        state.status = ConnectionStatus::Connected;
        state.running = true;
        drop(state);

        self.spawn_event_listener(events_rx);
        Ok(())
    }

    pub async fn request_tunnel(&self, config: TunnelConfig) -> Result<Arc<ActiveTunnel>> {
        let state = self.state.lock().await;
        let control = state
            .control
            .as_ref()
            .ok_or_else(|| RetunnelError::connection("supervisor is not connected"))?;
        let grant = control.request_tunnel(&config).await?;
        if let Some(subdomain) = grant.subdomain.clone() {
            control.start_subdomain_heartbeat(subdomain).await;
        }
        drop(state);

        let mut config = config;
        config.subdomain = grant.subdomain.clone();
        let tunnel = self
            .registry
            .insert(ActiveTunnel::new(grant.tunnel_id, grant.url, config))
            .await;
        Ok(tunnel)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state.lock().await.status, ConnectionStatus::Connected)
    }

    pub async fn is_reconnecting(&self) -> bool {
        matches!(
            self.state.lock().await.status,
            ConnectionStatus::Reconnecting { .. }
        )
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.state.lock().await.status.clone()
    }

    pub async fn get_requests(&self) -> Vec<RequestLogEntry> {
        self.requests.drain().await
    }

    pub async fn record_request(&self, entry: RequestLogEntry) {
        self.requests.record(entry).await;
    }

    pub async fn get_stats(&self, tunnel_id: &str) -> Option<crate::tunnel::TunnelStats> {
        self.registry.get(tunnel_id).await.map(|t| t.stats())
    }

    /// Idempotent: a second call while already closed is a no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;
        if let Some(task) = state.reconnect_task.take() {
            task.abort();
        }
        if let Some(control) = state.control.take() {
            control.close().await;
        }
        state.status = ConnectionStatus::Disconnected;
        drop(state);

        for tunnel in self.registry.all().await {
            self.registry.remove(&tunnel.tunnel_id).await;
        }
    }

    /// Spawns a task that turns `ReqProxy` events from the control
    /// session's dispatcher into proxy sessions. Each proxy session runs
    /// on its own task so a slow local service never blocks the next
    /// inbound request.
    fn spawn_event_listener(&self, mut events: mpsc::Receiver<SessionEvent>) {
        let collaborators = self.collaborators.clone();
        let registry = self.registry.clone();
        let client_id = self.client_id.clone();
        let requests = self.requests.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::ReqProxy => {
                        let collaborators = collaborators.clone();
                        let registry = registry.clone();
                        let client_id = client_id.read().await.clone();
                        let requests = requests.clone();
                        tokio::spawn(async move {
                            if let Err(e) = crate::proxy::run_proxy_session(
                                &collaborators.config,
                                &client_id,
                                collaborators.config.auth_token.as_deref(),
                                &registry,
                                &requests,
                            )
                            .await
                            {
                                warn!(error = %e, "proxy session ended with an error");
                            }
                        });
                    }
                }
            }
        });
    }

    /// Runs the reconnect loop of spec §4.7: on a fatal control-stream
    /// error, back off from 1 s up to 16 s, retry `connect()`, then
    /// re-request every tunnel that was active before the disconnect
    /// with its original subdomain forced.
    pub async fn watch_and_reconnect(self: &Arc<Self>) {
        loop {
            {
                let state = self.state.lock().await;
                if !state.running {
                    return;
                }
                let still_connected = state
                    .control
                    .as_ref()
                    .map(|c| c.is_connected())
                    .unwrap_or(false);
                if still_connected {
                    drop(state);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            {
                let mut state = self.state.lock().await;
                if !state.running {
                    return;
                }
                state.status = ConnectionStatus::Reconnecting {
                    reason: "control stream disconnected".to_owned(),
                };
                if let Some(control) = state.control.take() {
                    control.close().await;
                }
            }

            let previous_tunnels = self.registry.all().await;
            let mut delay = RECONNECT_INITIAL_DELAY;
            loop {
                {
                    let state = self.state.lock().await;
                    if !state.running {
                        return;
                    }
                }
                tokio::time::sleep(delay).await;
                match self.connect().await {
                    Ok(()) => {
                        info!("reconnected, re-requesting {} tunnel(s)", previous_tunnels.len());
                        for tunnel in &previous_tunnels {
                            if let Err(e) = self.reissue_tunnel(tunnel).await {
                                error!(tunnel_id = %tunnel.tunnel_id, error = %e, "failed to re-request tunnel after reconnect");
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, delay_secs = delay.as_secs(), "reconnect attempt failed");
                        delay = std::cmp::min(delay * 2, RECONNECT_MAX_DELAY);
                    }
                }
            }
        }
    }

    async fn reissue_tunnel(&self, previous: &Arc<ActiveTunnel>) -> Result<()> {
        let state = self.state.lock().await;
        let control = state
            .control
            .as_ref()
            .ok_or_else(|| RetunnelError::connection("not connected"))?;
        let grant = control
            .request_tunnel_with_subdomain(&previous.config, previous.config.subdomain.clone())
            .await?;
        if let Some(subdomain) = grant.subdomain.clone() {
            control.start_subdomain_heartbeat(subdomain).await;
        }
        drop(state);

        self.registry.remove(&previous.tunnel_id).await;
        self.registry
            .insert(ActiveTunnel::new(
                grant.tunnel_id,
                grant.url,
                previous.config.clone(),
            ))
            .await;
        Ok(())
    }
}

fn registrar_base_url(config: &AgentConfig) -> String {
    let scheme = if config.is_local_endpoint() { "http" } else { "https" };
    format!("{scheme}://{}", config.server_endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_is_capped_at_sixteen_seconds() {
        let mut delay = RECONNECT_INITIAL_DELAY;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_secs());
            delay = std::cmp::min(delay * 2, RECONNECT_MAX_DELAY);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 16]);
    }

    #[test]
    fn connection_status_variants_are_distinguishable() {
        assert_ne!(ConnectionStatus::Connected, ConnectionStatus::Disconnected);
        assert_ne!(
            ConnectionStatus::Connected,
            ConnectionStatus::Reconnecting {
                reason: "x".to_owned()
            }
        );
    }
}
