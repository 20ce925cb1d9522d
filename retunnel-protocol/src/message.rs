//! The control/proxy message catalog.
//!
//! Each variant matches a `Type` tag on the wire (see spec §4.2). Encoding
//! and decoding go through a dynamic `rmpv::Value::Map` by hand instead of
//! a derived serde tagged enum: the catalog's PascalCase field names, its
//! "omit empty fields" rule, and its "unknown tag is a dedicated ignored
//! variant, not an error" rule are all straightforward against a map and
//! awkward against `#[serde(tag = "Type")]` + MessagePack. This mirrors
//! how the original Python client hand-wrote `Message.pack`/`unpack`.

use rmpv::Value;

use crate::error::ProtocolError;
use crate::proxy_payload::{ProxyRequest, ProxyResponse};
use crate::value_ext::{get_opt_str, get_str, get_type, get_u16, get_u64, MapBuilder};

/// Error codes the gateway may report in an `ErrorResp`. The set is
/// open-ended on the wire, so unrecognized codes are preserved verbatim
/// rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    OverCapacity,
    FreeTierLimitReached,
    Other(String),
}

impl ErrorCode {
    fn as_wire(&self) -> &str {
        match self {
            ErrorCode::OverCapacity => "OVER_CAPACITY",
            ErrorCode::FreeTierLimitReached => "FREE_TIER_LIMIT_REACHED",
            ErrorCode::Other(s) => s,
        }
    }

    fn from_wire(s: &str) -> Self {
        match s {
            "OVER_CAPACITY" => ErrorCode::OverCapacity,
            "FREE_TIER_LIMIT_REACHED" => ErrorCode::FreeTierLimitReached,
            other => ErrorCode::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub client_id: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub mm_version: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResp {
    pub client_id: String,
    pub version: String,
    pub mm_version: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReqTunnel {
    pub req_id: String,
    pub protocol: String,
    pub hostname: Option<String>,
    pub subdomain: Option<String>,
    pub http_auth: Option<String>,
    pub remote_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTunnel {
    pub req_id: String,
    pub url: String,
    pub protocol: String,
    pub subdomain: Option<String>,
    pub tunnel_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResp {
    pub req_id: String,
    pub error_code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegProxy {
    pub client_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartProxy {
    pub url: String,
    pub client_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub subdomain: String,
    pub timestamp: u64,
}

/// A single message on the control or proxy stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Auth(Auth),
    AuthResp(AuthResp),
    ReqTunnel(ReqTunnel),
    NewTunnel(NewTunnel),
    ErrorResp(ErrorResp),
    ReqProxy,
    RegProxy(RegProxy),
    StartProxy(StartProxy),
    Proxy(ProxyRequest),
    ProxyResp(ProxyResponse),
    Ping,
    Pong,
    Heartbeat(Heartbeat),
    /// A recognized-but-unroutable payload, or an unrecognized `Type` tag.
    /// The dispatcher logs and drops these; it never errors on them.
    Unknown(String),
}

impl Message {
    fn to_value(&self) -> Value {
        match self {
            Message::Auth(m) => MapBuilder::new()
                .str("Type", "Auth")
                .str("ClientId", m.client_id.clone())
                .str_if_nonempty("OS", &m.os)
                .str_if_nonempty("Arch", &m.arch)
                .str_if_nonempty("Version", &m.version)
                .str_if_nonempty("MmVersion", &m.mm_version)
                .str_if_nonempty("User", &m.user)
                .str_if_nonempty("Password", &m.password)
                .build(),
            Message::AuthResp(m) => MapBuilder::new()
                .str("Type", "AuthResp")
                .str("ClientId", m.client_id.clone())
                .str_if_nonempty("Version", &m.version)
                .str_if_nonempty("MmVersion", &m.mm_version)
                .opt_str("Error", m.error.as_deref())
                .build(),
            Message::ReqTunnel(m) => MapBuilder::new()
                .str("Type", "ReqTunnel")
                .str_if_nonempty("ReqId", &m.req_id)
                .str("Protocol", m.protocol.clone())
                .opt_str("Hostname", m.hostname.as_deref())
                .opt_str("Subdomain", m.subdomain.as_deref())
                .opt_str("HttpAuth", m.http_auth.as_deref())
                .u16_if_nonzero("RemotePort", m.remote_port)
                .build(),
            Message::NewTunnel(m) => MapBuilder::new()
                .str("Type", "NewTunnel")
                .str("ReqId", m.req_id.clone())
                .str_if_nonempty("Url", &m.url)
                .str_if_nonempty("Protocol", &m.protocol)
                .opt_str("Subdomain", m.subdomain.as_deref())
                .str_if_nonempty("TunnelId", &m.tunnel_id)
                .opt_str("Error", m.error.as_deref())
                .build(),
            Message::ErrorResp(m) => MapBuilder::new()
                .str("Type", "ErrorResp")
                .str("ReqId", m.req_id.clone())
                .str("ErrorCode", m.error_code.as_wire())
                .str_if_nonempty("Message", &m.message)
                .build(),
            Message::ReqProxy => MapBuilder::new().str("Type", "ReqProxy").build(),
            Message::RegProxy(m) => MapBuilder::new()
                .str("Type", "RegProxy")
                .str("ClientId", m.client_id.clone())
                .build(),
            Message::StartProxy(m) => MapBuilder::new()
                .str("Type", "StartProxy")
                .str("Url", m.url.clone())
                .str_if_nonempty("ClientAddr", &m.client_addr)
                .build(),
            Message::Proxy(req) => MapBuilder::new()
                .str("Type", "Proxy")
                .build_with_data(req.to_value()),
            Message::ProxyResp(resp) => MapBuilder::new()
                .str("Type", "Proxy")
                .build_with_data(resp.to_value()),
            Message::Ping => MapBuilder::new().str("Type", "Ping").build(),
            Message::Pong => MapBuilder::new().str("Type", "Pong").build(),
            Message::Heartbeat(m) => MapBuilder::new()
                .str("Type", "Heartbeat")
                .str_if_nonempty("Subdomain", &m.subdomain)
                .u64_if_nonzero("Timestamp", m.timestamp)
                .build(),
            Message::Unknown(tag) => MapBuilder::new().str("Type", tag.clone()).build(),
        }
    }

    /// Encodes this message as MessagePack bytes (no length prefix — see
    /// `frame::encode_frame` for that).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &self.to_value())
            .expect("encoding to an in-memory Vec cannot fail");
        out
    }

    /// Decodes a message from MessagePack bytes. A frame with an
    /// unrecognized `Type` decodes to `Message::Unknown` rather than
    /// erroring; only a structurally broken payload is a `ProtocolError`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let tag = get_type(&value)?;

        Ok(match tag.as_str() {
            "Auth" => Message::Auth(Auth {
                client_id: get_str(&value, "ClientId"),
                os: get_str(&value, "OS"),
                arch: get_str(&value, "Arch"),
                version: get_str(&value, "Version"),
                mm_version: get_str(&value, "MmVersion"),
                user: get_str(&value, "User"),
                password: get_str(&value, "Password"),
            }),
            "AuthResp" => Message::AuthResp(AuthResp {
                client_id: get_str(&value, "ClientId"),
                version: get_str(&value, "Version"),
                mm_version: get_str(&value, "MmVersion"),
                error: get_opt_str(&value, "Error"),
            }),
            "ReqTunnel" => Message::ReqTunnel(ReqTunnel {
                req_id: get_str(&value, "ReqId"),
                protocol: get_str(&value, "Protocol"),
                hostname: get_opt_str(&value, "Hostname"),
                subdomain: get_opt_str(&value, "Subdomain"),
                http_auth: get_opt_str(&value, "HttpAuth"),
                remote_port: get_u16(&value, "RemotePort"),
            }),
            "NewTunnel" => Message::NewTunnel(NewTunnel {
                req_id: get_str(&value, "ReqId"),
                url: get_str(&value, "Url"),
                protocol: get_str(&value, "Protocol"),
                subdomain: get_opt_str(&value, "Subdomain"),
                tunnel_id: get_str(&value, "TunnelId"),
                error: get_opt_str(&value, "Error"),
            }),
            "ErrorResp" => Message::ErrorResp(ErrorResp {
                req_id: get_str(&value, "ReqId"),
                error_code: ErrorCode::from_wire(&get_str(&value, "ErrorCode")),
                message: get_str(&value, "Message"),
            }),
            "ReqProxy" => Message::ReqProxy,
            "RegProxy" => Message::RegProxy(RegProxy {
                client_id: get_str(&value, "ClientId"),
            }),
            "StartProxy" => Message::StartProxy(StartProxy {
                url: get_str(&value, "Url"),
                client_addr: get_str(&value, "ClientAddr"),
            }),
            "Proxy" => {
                let data = crate::value_ext::map_lookup(&value, "data").cloned();
                match data {
                    Some(inner) if inner.as_map().map(|m| has_response_shape(m)).unwrap_or(false) => {
                        Message::ProxyResp(ProxyResponse::from_value(&inner))
                    }
                    Some(inner) => Message::Proxy(ProxyRequest::from_value(&inner)),
                    None => Message::Proxy(ProxyRequest::default()),
                }
            }
            "Ping" => Message::Ping,
            "Pong" => Message::Pong,
            "Heartbeat" => Message::Heartbeat(Heartbeat {
                subdomain: get_str(&value, "Subdomain"),
                timestamp: get_u64(&value, "Timestamp"),
            }),
            other => Message::Unknown(other.to_owned()),
        })
    }
}

fn has_response_shape(map: &[(Value, Value)]) -> bool {
    map.iter().any(|(k, _)| k.as_str() == Some("status"))
}

trait MapBuilderExt {
    fn build_with_data(self, data: Value) -> Value;
}

impl MapBuilderExt for MapBuilder {
    fn build_with_data(self, data: Value) -> Value {
        match self.build() {
            Value::Map(mut fields) => {
                fields.push((Value::from("data"), data));
                Value::Map(fields)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn roundtrip(msg: Message) -> Message {
        Message::decode(&msg.encode()).unwrap()
    }

    #[test]
    fn auth_round_trips() {
        let msg = Message::Auth(Auth {
            client_id: "cli_1".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            version: "1.0.0".into(),
            mm_version: "1.0".into(),
            user: "tok_abc".into(),
            password: String::new(),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn empty_fields_are_omitted_on_the_wire() {
        let msg = Message::AuthResp(AuthResp {
            client_id: "srv-42".into(),
            version: String::new(),
            mm_version: String::new(),
            error: None,
        });
        let value = msg.to_value();
        let map = value.as_map().unwrap();
        assert!(!map.iter().any(|(k, _)| k.as_str() == Some("Version")));
        assert!(!map.iter().any(|(k, _)| k.as_str() == Some("Error")));
    }

    #[test]
    fn req_tunnel_round_trips_with_optionals() {
        let msg = Message::ReqTunnel(ReqTunnel {
            req_id: "req_1".into(),
            protocol: "http".into(),
            hostname: None,
            subdomain: Some("demo".into()),
            http_auth: None,
            remote_port: 0,
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn error_resp_preserves_unknown_error_codes() {
        let msg = Message::ErrorResp(ErrorResp {
            req_id: "req_1".into(),
            error_code: ErrorCode::Other("SOMETHING_NEW".into()),
            message: "details".into(),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn unknown_type_decodes_to_unknown_variant() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(
            &mut bytes,
            &MapBuilder::new().str("Type", "FutureMessage").build(),
        )
        .unwrap();
        assert_eq!(
            Message::decode(&bytes).unwrap(),
            Message::Unknown("FutureMessage".into())
        );
    }

    #[test]
    fn proxy_request_and_response_round_trip_through_the_data_field() {
        let req = Message::Proxy(ProxyRequest {
            method: "GET".into(),
            path: "/x".into(),
            query: String::new(),
            headers: HashMap::from([("Host".into(), "demo.retunnel.net".into())]),
            body: Vec::new(),
        });
        assert_eq!(roundtrip(req.clone()), req);

        let resp = Message::ProxyResp(ProxyResponse {
            status: 200,
            headers: HashMap::from([("Content-Length".into(), "5".into())]),
            body: b"hello".to_vec(),
        });
        assert_eq!(roundtrip(resp.clone()), resp);
    }
}
