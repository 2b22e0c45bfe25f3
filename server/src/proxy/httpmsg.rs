//! Minimal HTTP/1.1 message composition and parsing for the service proxy.
//!
//! The proxy's "upstream" is not a real TCP socket: it is a tunnel stream
//! multiplexed inside a WebSocket. There is no hyper client to reach for, so
//! requests are hand-composed onto the stream and responses are parsed back
//! with `httparse`, the same minimal-HTTP/1.1 approach this codebase's proxy
//! ancestry uses for header framing.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Headers that must never be forwarded verbatim between hops (spec §4.8).
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str, preserve_connection: bool) -> bool {
    let lower = name.to_ascii_lowercase();
    if preserve_connection && lower == "connection" {
        return false;
    }
    HOP_BY_HOP.contains(&lower.as_str())
}

pub struct ForwardedInfo {
    pub proto: String,
    pub host: String,
    pub for_addr: String,
    pub prefix: String,
}

/// Composes a minimal HTTP/1.1 request line + headers for forwarding onto a
/// tunnel stream. `host_port` overwrites any client-supplied `Host`.
pub fn compose_request(
    method: &Method,
    path_and_query: &str,
    client_headers: &HeaderMap,
    host_port: &str,
    forwarded: &ForwardedInfo,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{method} {path_and_query} HTTP/1.1\r\n").as_bytes());
    out.extend_from_slice(format!("Host: {host_port}\r\n").as_bytes());

    for (name, value) in client_headers.iter() {
        if is_hop_by_hop(name.as_str(), false) || name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
    }

    out.extend_from_slice(format!("X-Forwarded-Proto: {}\r\n", forwarded.proto).as_bytes());
    out.extend_from_slice(format!("X-Forwarded-Host: {}\r\n", forwarded.host).as_bytes());
    out.extend_from_slice(format!("X-Forwarded-For: {}\r\n", forwarded.for_addr).as_bytes());
    out.extend_from_slice(format!("X-Forwarded-Prefix: {}\r\n", forwarded.prefix).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"\r\n");
    out
}

/// Composes a minimal HTTP/1.1 Upgrade request, preserving `Upgrade`,
/// `Sec-WebSocket-*`, and `Connection` verbatim (spec §4.9).
pub fn compose_upgrade_request(method: &Method, path_and_query: &str, client_headers: &HeaderMap, host_port: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{method} {path_and_query} HTTP/1.1\r\n").as_bytes());
    out.extend_from_slice(format!("Host: {host_port}\r\n").as_bytes());

    for (name, value) in client_headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" {
            continue;
        }
        if is_hop_by_hop(name.as_str(), true) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[derive(Debug)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Bytes already read past the end of the header block (start of body).
    pub residual_body: Vec<u8>,
}

/// Incrementally accumulates bytes until a full HTTP/1.1 response header
/// block is available, then parses it with `httparse`.
pub struct ResponseReader {
    buf: Vec<u8>,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feeds more bytes in. Returns `Some(ParsedResponse)` once the header
    /// block is complete; otherwise accumulates and returns `None`.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<ParsedResponse>, httparse::Error> {
        self.buf.extend_from_slice(chunk);

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&self.buf)? {
            httparse::Status::Complete(header_len) => {
                let status = response.code.unwrap_or(502);
                let parsed_headers = response
                    .headers
                    .iter()
                    .filter_map(|h| {
                        let name = HeaderName::from_bytes(h.name.as_bytes()).ok()?;
                        let value = HeaderValue::from_bytes(h.value).ok()?;
                        Some((name, value))
                    })
                    .collect();
                let residual_body = self.buf[header_len..].to_vec();
                Ok(Some(ParsedResponse {
                    status,
                    headers: parsed_headers,
                    residual_body,
                }))
            }
            httparse::Status::Partial => Ok(None),
        }
    }
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Transfer-Encoding", false));
        assert!(is_hop_by_hop("Connection", false));
        assert!(!is_hop_by_hop("Connection", true));
        assert!(!is_hop_by_hop("Content-Type", false));
    }

    #[test]
    fn response_reader_parses_complete_response_with_body() {
        let mut reader = ResponseReader::new();
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let parsed = reader.feed(raw).unwrap().expect("complete response");
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.residual_body, b"ok");
    }

    #[test]
    fn response_reader_waits_for_more_bytes() {
        let mut reader = ResponseReader::new();
        assert!(reader.feed(b"HTTP/1.1 200 OK\r\n").unwrap().is_none());
        let parsed = reader.feed(b"\r\n").unwrap().expect("complete response");
        assert_eq!(parsed.status, 200);
    }
}
