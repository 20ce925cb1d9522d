//! Control session (component C6): the single authenticated full-duplex
//! channel to the gateway. Owns the dispatcher, the liveness heartbeat,
//! one per-subdomain heartbeat per active HTTP tunnel, and the
//! tunnel-request RPC.
//!
//! The session never holds a reference back to its `Supervisor` — spec
//! §9's "cyclic ownership" note. Instead `ReqProxy` notifications leave
//! via an `mpsc::Sender<SessionEvent>` the supervisor hands in at
//! `establish` time; the supervisor decides what a new proxy session
//! needs (the tunnel registry, the client id) and spawns it itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use retunnel_protocol::{
    generate_client_id, generate_request_id, Auth, ErrorCode, ErrorResp, Heartbeat, Message,
    NewTunnel, ReqTunnel,
};

use crate::config::{AgentConfig, TunnelConfig};
use crate::error::{RetunnelError, Result};
use crate::registrar::RegistrarClient;
use crate::token::TokenStore;
use crate::transport::{ControlReceiver, ControlSender, ControlTransport, Endpoint};

const LIVENESS_INTERVAL: Duration = Duration::from_secs(20);
const SUBDOMAIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const REQUEST_TUNNEL_TIMEOUT: Duration = Duration::from_secs(10);
const INVALID_TOKEN_ERROR: &str = "Invalid auth token";

/// Events the dispatcher can't resolve on its own and hands up to
/// whoever owns the tunnel registry and can spawn proxy sessions.
pub enum SessionEvent {
    ReqProxy,
}

enum PendingReply {
    NewTunnel(NewTunnel),
    ErrorResp(ErrorResp),
}

/// The outcome of a successful `request_tunnel` call, before the caller
/// wraps it into an `ActiveTunnel` with byte counters.
#[derive(Debug, Clone)]
pub struct TunnelGrant {
    pub tunnel_id: String,
    pub url: String,
    pub subdomain: Option<String>,
}

struct Shared {
    sender: Mutex<ControlSender>,
    pending: Mutex<HashMap<String, oneshot::Sender<PendingReply>>>,
    connected: AtomicBool,
    client_id: Mutex<String>,
}

pub struct ControlSession {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
    liveness: JoinHandle<()>,
    subdomain_heartbeats: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ControlSession {
    /// Runs the full establishment sequence of spec §4.5: token lookup,
    /// anonymous registration if none exists, `Auth`/`AuthResp` exchange,
    /// and a single retry with token repair if the server refuses the
    /// token.
    pub async fn establish(
        config: &AgentConfig,
        token_store: &TokenStore,
        registrar: &RegistrarClient,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let mut token = resolve_initial_token(config, token_store, registrar).await?;
        let client_id = generate_client_id();

        let authenticated = match try_authenticate(config, &client_id, &token).await {
            Ok(authenticated) => authenticated,
            Err(AuthAttemptError::InvalidToken) => {
                info!("gateway rejected persisted token, repairing");
                let repaired = registrar.repair_token(Some(&token)).await?;
                token_store.set(&repaired.auth_token)?;
                token = repaired.auth_token;
                match try_authenticate(config, &client_id, &token).await {
                    Ok(authenticated) => authenticated,
                    Err(_) => {
                        return Err(RetunnelError::Authentication(
                            "token repair did not resolve authentication failure".to_owned(),
                        ))
                    }
                }
            }
            Err(AuthAttemptError::Fatal(e)) => return Err(e),
        };

        Ok(ControlSession::new(authenticated, events))
    }

    pub async fn client_id(&self) -> String {
        self.shared.client_id.lock().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Mints a request id, registers a waiter, sends `ReqTunnel`, and
    /// waits up to 10 s for the correlated reply.
    pub async fn request_tunnel(&self, config: &TunnelConfig) -> Result<TunnelGrant> {
        self.request_tunnel_with_subdomain(config, config.subdomain.clone())
            .await
    }

    /// Used by the reconnect loop to re-request a tunnel while forcing
    /// the previously-issued subdomain, so the public URL survives the
    /// reconnect (spec §4.7 step 4).
    pub async fn request_tunnel_with_subdomain(
        &self,
        config: &TunnelConfig,
        subdomain: Option<String>,
    ) -> Result<TunnelGrant> {
        let req_id = generate_request_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(req_id.clone(), tx);

        let send_result = {
            let mut sender = self.shared.sender.lock().await;
            sender
                .send(&Message::ReqTunnel(ReqTunnel {
                    req_id: req_id.clone(),
                    protocol: config.protocol.as_wire().to_owned(),
                    hostname: config.hostname.clone(),
                    subdomain,
                    http_auth: config.http_auth.clone(),
                    remote_port: config.remote_port.unwrap_or(0),
                }))
                .await
        };
        if let Err(e) = send_result {
            self.shared.pending.lock().await.remove(&req_id);
            return Err(e);
        }

        let reply = timeout(REQUEST_TUNNEL_TIMEOUT, rx).await;
        self.shared.pending.lock().await.remove(&req_id);

        match reply {
            Err(_elapsed) => Err(RetunnelError::tunnel("tunnel request timed out")),
            Ok(Err(_canceled)) => Err(RetunnelError::connection(
                "control session closed before tunnel request completed",
            )),
            Ok(Ok(PendingReply::ErrorResp(err))) => Err(RetunnelError::tunnel(
                describe_tunnel_error(&err.error_code, &err.message),
            )),
            Ok(Ok(PendingReply::NewTunnel(nt))) if nt.error.as_deref().is_some_and(|e| !e.is_empty()) => {
                Err(RetunnelError::tunnel(nt.error.unwrap()))
            }
            Ok(Ok(PendingReply::NewTunnel(nt))) => Ok(TunnelGrant {
                tunnel_id: nt.tunnel_id,
                url: nt.url,
                subdomain: nt.subdomain,
            }),
        }
    }

    /// Starts a 30 s `Heartbeat` loop for `subdomain`, idempotently —
    /// calling this twice for the same subdomain replaces the old task.
    pub async fn start_subdomain_heartbeat(&self, subdomain: String) {
        let shared = self.shared.clone();
        let task_subdomain = subdomain.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SUBDOMAIN_HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let timestamp = unix_timestamp_secs();
                let mut sender = shared.sender.lock().await;
                if let Err(e) = sender
                    .send(&Message::Heartbeat(Heartbeat {
                        subdomain: task_subdomain.clone(),
                        timestamp,
                    }))
                    .await
                {
                    warn!(subdomain = %task_subdomain, error = %e, "subdomain heartbeat send failed");
                    shared.connected.store(false, Ordering::Release);
                    return;
                }
            }
        });
        let mut heartbeats = self.subdomain_heartbeats.lock().await;
        if let Some(old) = heartbeats.insert(subdomain, handle) {
            old.abort();
        }
    }

    pub async fn stop_subdomain_heartbeat(&self, subdomain: &str) {
        if let Some(handle) = self.subdomain_heartbeats.lock().await.remove(subdomain) {
            handle.abort();
        }
    }

    pub async fn active_subdomain_heartbeat_count(&self) -> usize {
        self.subdomain_heartbeats.lock().await.len()
    }

    /// Cancels every background task and closes the underlying stream.
    /// Idempotent: aborting an already-finished task is a no-op.
    pub async fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.dispatcher.abort();
        self.liveness.abort();
        for (_, handle) in self.subdomain_heartbeats.lock().await.drain() {
            handle.abort();
        }
        let mut pending = self.shared.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(PendingReply::ErrorResp(ErrorResp {
                req_id: String::new(),
                error_code: ErrorCode::Other("connection_closed".to_owned()),
                message: "control session closed".to_owned(),
            }));
        }
        let _ = self.shared.sender.lock().await.close().await;
    }
}

enum AuthAttemptError {
    InvalidToken,
    Fatal(RetunnelError),
}

/// The result of a successful `Auth`/`AuthResp` exchange: the transport,
/// split into its two halves, plus the (possibly server-rewritten)
/// client id.
struct AuthenticatedTransport {
    client_id: String,
    sender: ControlSender,
    receiver: ControlReceiver,
}

async fn try_authenticate(
    config: &AgentConfig,
    client_id: &str,
    token: &str,
) -> std::result::Result<AuthenticatedTransport, AuthAttemptError> {
    let mut transport = ControlTransport::connect(config, Endpoint::Control, Some(token))
        .await
        .map_err(AuthAttemptError::Fatal)?;

    transport
        .send(&Message::Auth(Auth {
            client_id: client_id.to_owned(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            mm_version: env!("CARGO_PKG_VERSION").to_owned(),
            user: token.to_owned(),
            password: String::new(),
        }))
        .await
        .map_err(AuthAttemptError::Fatal)?;

    let reply = transport.recv().await.map_err(AuthAttemptError::Fatal)?;
    let auth_resp = match reply {
        Some(Message::AuthResp(resp)) => resp,
        Some(other) => {
            return Err(AuthAttemptError::Fatal(RetunnelError::Authentication(
                format!("expected AuthResp, got {other:?}"),
            )))
        }
        None => {
            return Err(AuthAttemptError::Fatal(RetunnelError::Authentication(
                "control stream closed before AuthResp".to_owned(),
            )))
        }
    };

    if let Some(err) = auth_resp.error.filter(|e| !e.is_empty()) {
        if err == INVALID_TOKEN_ERROR {
            return Err(AuthAttemptError::InvalidToken);
        }
        return Err(AuthAttemptError::Fatal(RetunnelError::Authentication(err)));
    }

    let (sender, receiver) = transport.split();
    Ok(AuthenticatedTransport {
        client_id: auth_resp.client_id,
        sender,
        receiver,
    })
}

impl ControlSession {
    fn new(authenticated: AuthenticatedTransport, events: mpsc::Sender<SessionEvent>) -> Self {
        let shared = Arc::new(Shared {
            sender: Mutex::new(authenticated.sender),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            client_id: Mutex::new(authenticated.client_id),
        });

        let liveness_shared = shared.clone();
        let liveness = tokio::spawn(async move {
            run_liveness_heartbeat(liveness_shared).await;
        });

        let dispatcher_shared = shared.clone();
        let receiver = authenticated.receiver;
        let dispatcher = tokio::spawn(async move {
            run_dispatcher(dispatcher_shared, receiver, events).await;
        });

        Self {
            shared,
            dispatcher,
            liveness,
            subdomain_heartbeats: Mutex::new(HashMap::new()),
        }
    }
}

async fn run_liveness_heartbeat(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut sender = shared.sender.lock().await;
        if let Err(e) = sender.send(&Message::Ping).await {
            warn!(error = %e, "liveness ping failed, marking session disconnected");
            shared.connected.store(false, Ordering::Release);
            return;
        }
    }
}

async fn run_dispatcher(
    shared: Arc<Shared>,
    mut receiver: ControlReceiver,
    events: mpsc::Sender<SessionEvent>,
) {
    loop {
        let message = match receiver.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("control stream closed by gateway");
                shared.connected.store(false, Ordering::Release);
                return;
            }
            Err(e) => {
                error!(error = %e, "control stream read failed");
                shared.connected.store(false, Ordering::Release);
                return;
            }
        };

        match message {
            Message::NewTunnel(nt) => complete_waiter(&shared, &nt.req_id, PendingReply::NewTunnel(nt)).await,
            Message::ErrorResp(err) => {
                complete_waiter(&shared, &err.req_id.clone(), PendingReply::ErrorResp(err)).await
            }
            Message::ReqProxy => {
                if events.send(SessionEvent::ReqProxy).await.is_err() {
                    debug!("no one is listening for ReqProxy events, dropping");
                }
            }
            Message::Ping => {
                let mut sender = shared.sender.lock().await;
                let _ = sender.send(&Message::Pong).await;
            }
            Message::Pong => {
                // liveness counter reset: the next tick already re-arms itself.
            }
            other => debug!(?other, "unhandled control message"),
        }
    }
}

async fn complete_waiter(shared: &Arc<Shared>, req_id: &str, reply: PendingReply) {
    let waiter = shared.pending.lock().await.remove(req_id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => debug!(req_id, "no pending waiter for reply, dropping"),
    }
}

fn describe_tunnel_error(code: &ErrorCode, message: &str) -> String {
    match code {
        ErrorCode::OverCapacity => "no subdomains available".to_owned(),
        ErrorCode::FreeTierLimitReached => "free-tier limit".to_owned(),
        ErrorCode::Other(_) if !message.is_empty() => message.to_owned(),
        ErrorCode::Other(other) => format!("tunnel request failed: {other}"),
    }
}

async fn resolve_initial_token(
    config: &AgentConfig,
    token_store: &TokenStore,
    registrar: &RegistrarClient,
) -> Result<String> {
    if let Some(token) = config.auth_token.clone() {
        return Ok(token);
    }
    if let Some(token) = token_store.get() {
        return Ok(token);
    }
    let registration = registrar.register_anonymous().await?;
    token_store.set(&registration.auth_token)?;
    Ok(registration.auth_token)
}

fn unix_timestamp_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_error_codes_get_fixed_messages() {
        assert_eq!(
            describe_tunnel_error(&ErrorCode::OverCapacity, "ignored"),
            "no subdomains available"
        );
        assert_eq!(
            describe_tunnel_error(&ErrorCode::FreeTierLimitReached, "ignored"),
            "free-tier limit"
        );
    }

    #[test]
    fn unknown_error_codes_prefer_the_message_when_present() {
        let code = ErrorCode::Other("SOMETHING_ELSE".to_owned());
        assert_eq!(describe_tunnel_error(&code, "human readable detail"), "human readable detail");
        assert_eq!(
            describe_tunnel_error(&code, ""),
            "tunnel request failed: SOMETHING_ELSE"
        );
    }
}
