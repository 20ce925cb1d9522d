//! Control-stream transport: a WebSocket duplex carrying length-prefixed
//! frames, each frame an encoded `Message`.
//!
//! This layers `retunnel_protocol`'s frame codec on top of
//! `tokio-tungstenite`'s binary WebSocket messages rather than relying on
//! WebSocket's own message framing, because the gateway speaks the same
//! length-prefixed wire format over both raw TCP and WebSocket transports
//! (spec §6) — the frame boundary is a protocol concern, not a transport one.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use retunnel_protocol::{encode_frame, FrameAssembler, Message};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::AgentConfig;
use crate::error::{RetunnelError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Which of the gateway's two WebSocket endpoints to dial (spec §6):
/// control sessions and proxy sessions never share a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Control,
    Proxy,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Control => "/api/v1/ws/tunnel",
            Endpoint::Proxy => "/api/v1/ws/proxy",
        }
    }
}

pub struct ControlTransport {
    socket: WsStream,
    assembler: FrameAssembler,
}

impl ControlTransport {
    /// Opens the WebSocket connection to `config.server_endpoint`, using
    /// `ws://` for local endpoints and `wss://` otherwise, and attaching
    /// `auth_token` as a bearer `Authorization` header on the handshake
    /// when one is available.
    pub async fn connect(
        config: &AgentConfig,
        endpoint: Endpoint,
        auth_token: Option<&str>,
    ) -> Result<Self> {
        let scheme = if config.is_local_endpoint() { "ws" } else { "wss" };
        let url = format!("{scheme}://{}{}", config.server_endpoint, endpoint.path());

        let mut request = url
            .into_client_request()
            .map_err(|e| RetunnelError::connection(e.to_string()))?;
        if let Some(token) = auth_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| RetunnelError::connection("invalid auth token header"))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(Self {
            socket,
            assembler: FrameAssembler::new(),
        })
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = encode_frame(&message.encode());
        self.socket.send(WsMessage::Binary(frame)).await?;
        Ok(())
    }

    /// Reads the next complete message, pulling further WebSocket frames
    /// off the socket until the length-prefixed assembler yields one.
    /// Returns `Ok(None)` once the peer closes the stream cleanly.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                return Ok(Some(Message::decode(&frame)?));
            }

            match self.socket.next().await {
                Some(Ok(WsMessage::Binary(chunk))) => self.assembler.push(&chunk),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/text frames carry no protocol payload
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }

    /// Splits into an independently-owned sender and receiver so a
    /// dispatcher task can hold the read half while other tasks (the
    /// heartbeats, `request_tunnel`) share the write half behind a lock.
    pub fn split(self) -> (ControlSender, ControlReceiver) {
        let (sink, stream) = self.socket.split();
        (
            ControlSender { sink },
            ControlReceiver {
                stream,
                assembler: self.assembler,
            },
        )
    }
}

pub struct ControlSender {
    sink: SplitSink<WsStream, WsMessage>,
}

impl ControlSender {
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = encode_frame(&message.encode());
        self.sink.send(WsMessage::Binary(frame)).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

pub struct ControlReceiver {
    stream: SplitStream<WsStream>,
    assembler: FrameAssembler,
}

impl ControlReceiver {
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                return Ok(Some(Message::decode(&frame)?));
            }

            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(chunk))) => self.assembler.push(&chunk),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
