//! Proxy session lifecycle (component C7 in spec terms).
//!
//! Each inbound request the gateway wants forwarded gets its own
//! WebSocket connection: `RegProxy` to claim it, `StartProxy` to learn
//! which tunnel and client address it's for, then a request/response loop
//! against the local TCP service until the gateway closes the stream.

use retunnel_protocol::{Message, ProxyResponse, RegProxy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::AgentConfig;
use crate::error::{RetunnelError, Result};
use crate::http_framing::{self, build_request};
use crate::supervisor::{RequestLog, RequestLogEntry};
use crate::tunnel::TunnelRegistry;

/// Runs one proxy session to completion. Opens its own transport (a
/// fresh WebSocket connection, distinct from the control session's) per
/// spec §5.3: proxy traffic and control traffic are never multiplexed
/// onto the same stream.
pub async fn run_proxy_session(
    config: &AgentConfig,
    client_id: &str,
    auth_token: Option<&str>,
    registry: &TunnelRegistry,
    requests: &RequestLog,
) -> Result<()> {
    let mut transport = crate::transport::ControlTransport::connect(
        config,
        crate::transport::Endpoint::Proxy,
        auth_token,
    )
    .await?;
    transport
        .send(&Message::RegProxy(RegProxy {
            client_id: client_id.to_owned(),
        }))
        .await?;

    let start = match transport.recv().await? {
        Some(Message::StartProxy(start)) => start,
        Some(other) => {
            return Err(RetunnelError::proxy(format!(
                "expected StartProxy, got {other:?}"
            )))
        }
        None => return Err(RetunnelError::proxy("proxy stream closed before StartProxy")),
    };

    let tunnel = registry
        .find_by_url(&start.url)
        .await
        .ok_or_else(|| RetunnelError::tunnel(format!("no active tunnel matches {}", start.url)))?;

    loop {
        let request = match transport.recv().await? {
            Some(Message::Proxy(request)) => request,
            Some(Message::Unknown(_)) => continue,
            Some(other) => {
                return Err(RetunnelError::proxy(format!(
                    "expected Proxy, got {other:?}"
                )))
            }
            None => return Ok(()), // gateway closed the proxy stream; session is over
        };

        let request_bytes = request_byte_len(&request);
        let method = request.method.clone();
        let path = request.path.clone();
        let response = forward_to_local_service(tunnel.config.local_port, &request, &tunnel.url).await?;
        let response_bytes = response.body.len() as u64;
        tunnel.record_request(request_bytes, response_bytes);
        requests
            .record(RequestLogEntry {
                tunnel_id: tunnel.tunnel_id.clone(),
                method,
                path,
                status: response.status,
            })
            .await;

        transport.send(&Message::ProxyResp(response)).await?;
    }
}

fn request_byte_len(request: &retunnel_protocol::ProxyRequest) -> u64 {
    request.body.len() as u64
}

/// Opens a TCP connection to the local service, writes the forwarded
/// request, reads the response, and rewrites any redirect `Location`
/// back through the tunnel.
async fn forward_to_local_service(
    local_port: u16,
    request: &retunnel_protocol::ProxyRequest,
    tunnel_url: &str,
) -> Result<ProxyResponse> {
    let mut stream = TcpStream::connect(("127.0.0.1", local_port)).await?;

    let host_header = tunnel_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stream
        .write_all(&build_request(request, host_header))
        .await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let head = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RetunnelError::proxy(
                "local service closed connection before sending a complete response",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        // An unparseable head is still forwarded as a 500 rather than
        // killing the whole proxy session over one bad local response.
        match http_framing::parse_head(&buf) {
            Ok(Some(head)) => break head,
            Ok(None) => continue,
            Err(_) => {
                return Ok(ProxyResponse {
                    status: 500,
                    headers: std::collections::HashMap::new(),
                    body: buf,
                })
            }
        }
    };

    match http_framing::content_length(&head.headers) {
        Some(wanted) => {
            while buf.len() - head.head_len < wanted {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break; // peer closed early; hand back whatever body bytes arrived
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
        // No Content-Length: read until the local service closes the
        // connection, per spec §4.6's "until close" fallback.
        None => loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        },
    }

    let body = buf[head.head_len..].to_vec();
    let mut headers = head.headers;

    if http_framing::is_redirect_status(head.status) {
        if let Some(location) = http_framing::header_ci(&headers, "Location") {
            let rewritten = http_framing::rewrite_redirect_location(location, tunnel_url);
            headers.insert("Location".to_owned(), rewritten);
        }
    }

    Ok(ProxyResponse {
        status: head.status,
        headers,
        body,
    })
}
