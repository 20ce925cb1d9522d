//! Pure HTTP/1.1 framing: building the request handed to the local
//! service, parsing its response, and rewriting `Location` headers so a
//! redirect issued by the local service still points back through the
//! tunnel.
//!
//! Kept free of any I/O so it can be exhaustively unit tested; `proxy.rs`
//! owns the actual socket reads/writes and calls into this module with
//! the bytes it accumulates.

use std::collections::HashMap;

use retunnel_protocol::ProxyRequest;
use url::Url;

use crate::error::{RetunnelError, Result};

/// Builds the raw HTTP/1.1 request line, headers, and body to write to
/// the local service's socket. `host_header` is the `Host` value to send
/// — the tunnel's public host, not `localhost`, so the local app sees the
/// same `Host` a direct visitor would.
pub fn build_request(req: &ProxyRequest, host_header: &str) -> Vec<u8> {
    let mut target = req.path.clone();
    if !req.query.is_empty() {
        target.push('?');
        target.push_str(&req.query);
    }
    if target.is_empty() {
        target.push('/');
    }

    let mut out = format!("{} {} HTTP/1.1\r\n", req.method, target).into_bytes();

    let mut wrote_host = false;
    let mut wrote_content_length = false;
    for (name, value) in &req.headers {
        if name.eq_ignore_ascii_case("host") {
            wrote_host = true;
        }
        if name.eq_ignore_ascii_case("content-length") {
            wrote_content_length = true;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !wrote_host {
        out.extend_from_slice(format!("Host: {host_header}\r\n").as_bytes());
    }
    if !wrote_content_length && !req.body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

/// The status line and headers of an HTTP response, plus where the body
/// starts within the buffer it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub head_len: usize,
}

/// Parses the status line and headers out of `raw`. Returns `Ok(None)`
/// when the terminating blank line hasn't arrived yet, so the caller
/// knows to keep reading from the socket.
///
/// Response bytes are decoded one byte per char (the latin-1 approach the
/// source client uses) rather than as UTF-8, since header values and the
/// status line are defined over a byte range that isn't guaranteed valid
/// UTF-8 and we only need to round-trip them, not interpret them as text.
pub fn parse_head(raw: &[u8]) -> Result<Option<ResponseHead>> {
    let Some(header_end) = find_subslice(raw, b"\r\n\r\n") else {
        return Ok(None);
    };
    let head_len = header_end + 4;
    let head_text = latin1_decode(&raw[..header_end]);
    let mut lines = head_text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| RetunnelError::proxy("empty response head"))?;
    let status = parse_status_line(status_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_owned(), value.trim().to_owned());
        }
    }

    Ok(Some(ResponseHead {
        status,
        headers,
        head_len,
    }))
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    let _version = parts
        .next()
        .ok_or_else(|| RetunnelError::proxy("missing HTTP version in status line"))?;
    let code = parts
        .next()
        .ok_or_else(|| RetunnelError::proxy("missing status code in status line"))?;
    code.parse::<u16>()
        .map_err(|_| RetunnelError::proxy(format!("invalid status code: {code}")))
}

/// Case-insensitive header lookup — HTTP header names aren't case
/// sensitive but `HashMap` keys are.
pub fn header_ci<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn content_length(headers: &HashMap<String, String>) -> Option<usize> {
    header_ci(headers, "Content-Length")?.parse().ok()
}

pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Rewrites a `Location` header so a redirect from the local service
/// keeps routing through the tunnel instead of leaking the local origin.
///
/// - A relative location is prefixed with `tunnel_url`.
/// - An absolute `http(s)://localhost` or `127.0.0.1` location has its
///   scheme and authority replaced with the tunnel's, preserving
///   path/query/fragment.
/// - Anything else (an external absolute URL) is returned unchanged.
pub fn rewrite_redirect_location(location: &str, tunnel_url: &str) -> String {
    if !location.starts_with("http://") && !location.starts_with("https://") {
        let tunnel = tunnel_url.trim_end_matches('/');
        if let Some(rest) = location.strip_prefix('/') {
            return format!("{tunnel}/{rest}");
        }
        return format!("{tunnel}/{location}");
    }

    let Ok(parsed) = Url::parse(location) else {
        return location.to_owned();
    };
    let is_local = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    if !is_local {
        return location.to_owned();
    }

    let Ok(tunnel_parsed) = Url::parse(tunnel_url) else {
        return location.to_owned();
    };

    let mut rewritten = parsed;
    let _ = rewritten.set_scheme(tunnel_parsed.scheme());
    let _ = rewritten.set_host(tunnel_parsed.host_str());
    let _ = rewritten.set_port(tunnel_parsed.port());
    rewritten.into()
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_adds_host_and_content_length_when_absent() {
        let req = ProxyRequest {
            method: "POST".to_owned(),
            path: "/submit".to_owned(),
            query: "a=1".to_owned(),
            headers: HashMap::new(),
            body: b"payload".to_vec(),
        };
        let bytes = build_request(&req, "demo.retunnel.net");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("POST /submit?a=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: demo.retunnel.net\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("payload"));
    }

    #[test]
    fn build_request_respects_an_explicit_host_header() {
        let mut headers = HashMap::new();
        headers.insert("Host".to_owned(), "explicit.example".to_owned());
        let req = ProxyRequest {
            method: "GET".to_owned(),
            path: "/".to_owned(),
            query: String::new(),
            headers,
            body: Vec::new(),
        };
        let text = String::from_utf8(build_request(&req, "demo.retunnel.net")).unwrap();
        assert_eq!(text.matches("Host:").count(), 1);
        assert!(text.contains("Host: explicit.example"));
    }

    #[test]
    fn parse_head_returns_none_until_blank_line_arrives() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n";
        assert!(parse_head(partial).unwrap().is_none());
    }

    #[test]
    fn parse_head_extracts_status_and_headers() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nX-Req: abc\r\n\r\n";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(content_length(&head.headers), Some(0));
        assert_eq!(header_ci(&head.headers, "x-req"), Some("abc"));
        assert_eq!(head.head_len, raw.len());
    }

    #[test]
    fn rewrite_relative_location_prefixes_tunnel_url() {
        let rewritten = rewrite_redirect_location("/login", "https://foo.retunnel.net");
        assert_eq!(rewritten, "https://foo.retunnel.net/login");
    }

    #[test]
    fn rewrite_absolute_localhost_location_swaps_authority() {
        let rewritten =
            rewrite_redirect_location("http://localhost:8080/login?next=/home", "https://foo.retunnel.net");
        assert_eq!(rewritten, "https://foo.retunnel.net/login?next=/home");
    }

    #[test]
    fn rewrite_absolute_loopback_ip_location_swaps_authority() {
        let rewritten = rewrite_redirect_location("http://127.0.0.1:3000/x", "https://foo.retunnel.net");
        assert_eq!(rewritten, "https://foo.retunnel.net/x");
    }

    #[test]
    fn rewrite_leaves_external_locations_untouched() {
        let rewritten = rewrite_redirect_location("https://example.com/elsewhere", "https://foo.retunnel.net");
        assert_eq!(rewritten, "https://example.com/elsewhere");
    }

    #[test]
    fn rewrite_is_idempotent_on_an_already_rewritten_url() {
        let once = rewrite_redirect_location("http://localhost:8080/login", "https://foo.retunnel.net");
        let twice = rewrite_redirect_location(&once, "https://foo.retunnel.net");
        assert_eq!(once, twice);
    }

    #[test]
    fn redirect_status_set_matches_spec() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect_status(code));
        }
        assert!(!is_redirect_status(200));
        assert!(!is_redirect_status(404));
    }
}
