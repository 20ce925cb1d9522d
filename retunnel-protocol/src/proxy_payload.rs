//! The self-describing objects embedded in a `Proxy` frame's `data` field.
//!
//! These are themselves MessagePack maps, separate from the outer
//! message envelope, carrying a forwarded HTTP request or response.

use std::collections::HashMap;

use rmpv::Value;

use crate::value_ext::{get_bytes, get_str, get_str_map, get_u16, MapBuilder};

/// A forwarded HTTP request, as handed to the proxy session by the
/// gateway inside a `Proxy` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    pub fn to_value(&self) -> Value {
        MapBuilder::new()
            .str("method", self.method.clone())
            .str("path", self.path.clone())
            .str_if_nonempty("query", &self.query)
            .str_map_if_nonempty("headers", &self.headers)
            .bytes_if_nonempty("body", &self.body)
            .build()
    }

    pub fn from_value(value: &Value) -> Self {
        Self {
            method: {
                let m = get_str(value, "method");
                if m.is_empty() { "GET".to_owned() } else { m }
            },
            path: {
                let p = get_str(value, "path");
                if p.is_empty() { "/".to_owned() } else { p }
            },
            query: get_str(value, "query"),
            headers: get_str_map(value, "headers"),
            body: get_bytes(value, "body"),
        }
    }
}

/// The response a proxy session hands back after talking to the local
/// service, including any `Location` rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn to_value(&self) -> Value {
        MapBuilder::new()
            .u16_if_nonzero("status", self.status)
            .str_map_if_nonempty("headers", &self.headers)
            .bytes_if_nonempty("body", &self.body)
            .build()
    }

    pub fn from_value(value: &Value) -> Self {
        Self {
            status: get_u16(value, "status"),
            headers: get_str_map(value, "headers"),
            body: get_bytes(value, "body"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_its_value() {
        let mut headers = HashMap::new();
        headers.insert("Host".to_owned(), "demo.retunnel.net".to_owned());
        let req = ProxyRequest {
            method: "GET".to_owned(),
            path: "/x".to_owned(),
            query: String::new(),
            headers,
            body: Vec::new(),
        };
        let roundtripped = ProxyRequest::from_value(&req.to_value());
        assert_eq!(req, roundtripped);
    }

    #[test]
    fn response_round_trips_with_a_body() {
        let resp = ProxyResponse {
            status: 200,
            headers: HashMap::from([("Content-Length".to_owned(), "5".to_owned())]),
            body: b"hello".to_vec(),
        };
        let roundtripped = ProxyResponse::from_value(&resp.to_value());
        assert_eq!(resp, roundtripped);
    }
}
