//! # retunnel-protocol
//!
//! The wire protocol shared by every piece of the retunnel client: opaque
//! id generation, the length-prefixed frame codec, and the control/proxy
//! message catalog. Kept in its own crate (mirroring the teacher's
//! `tunnel-protocol` crate) so it can be depended on without pulling in
//! `tokio`, WebSocket, or HTTP client machinery.

mod error;
mod frame;
mod id;
mod message;
mod proxy_payload;
mod value_ext;

pub use error::ProtocolError;
pub use frame::{encode_frame, FrameAssembler, MAX_FRAME_LEN};
pub use id::{
    generate_client_id, generate_id, generate_request_id, generate_session_id,
    generate_tunnel_local_id,
};
pub use message::{
    Auth, AuthResp, ErrorCode, ErrorResp, Heartbeat, Message, NewTunnel, RegProxy, ReqTunnel,
    StartProxy,
};
pub use proxy_payload::{ProxyRequest, ProxyResponse};
