//! HTTP/1.1 framing for socket transports.
//!
//! Requests are written as literal HTTP/1.1 text:
//! ```text
//! GET /localapi/v0/status?peers=false HTTP/1.1\r\n
//! Accept: application/json\r\n
//! Connection: close\r\n
//! Host: local-tailscaled.sock\r\n
//! Tailscale-Cap: 115\r\n
//! \r\n
//! ```
//! Headers are written in sorted order so the same request always produces
//! the same bytes.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::chunked;
use crate::error::TransportError;
use crate::request::{Headers, Request, Response};

/// Header carrying the client's capability version.
pub const CAPABILITY_HEADER: &str = "Tailscale-Cap";

/// `Host` value for requests over a Unix socket, where there is no real host.
pub const HOST_PLACEHOLDER: &str = "local-tailscaled.sock";

/// Characters left unescaped in query keys and values (RFC 3986 unreserved).
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Value of the `Connection` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One request, one response, then the server closes.
    Close,
    /// The server keeps the connection open and streams the body.
    KeepAlive,
}

impl ConnectionMode {
    fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Close => "close",
            ConnectionMode::KeepAlive => "keep-alive",
        }
    }
}

/// Serialize a request into HTTP/1.1 bytes.
pub fn encode_request(
    request: &Request,
    capability_version: u32,
    connection: ConnectionMode,
) -> Bytes {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    headers.insert("Host".to_string(), HOST_PLACEHOLDER.to_string());
    headers.insert("Connection".to_string(), connection.as_str().to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert(
        CAPABILITY_HEADER.to_string(),
        capability_version.to_string(),
    );
    if let Some(body) = request.body_bytes() {
        headers.insert("Content-Length".to_string(), body.len().to_string());
    }
    for (name, value) in request.headers() {
        headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }

    let target = request_target(request);
    let body_len = request.body_bytes().map_or(0, Bytes::len);

    let mut dst = BytesMut::with_capacity(256 + body_len);
    dst.put_slice(request.method().as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in &headers {
        dst.put_slice(name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
    if let Some(body) = request.body_bytes() {
        dst.put_slice(body);
    }

    dst.freeze()
}

/// Path plus percent-encoded query string.
pub fn request_target(request: &Request) -> String {
    let mut target = String::with_capacity(request.path().len() + 1);
    if !request.path().starts_with('/') {
        target.push('/');
    }
    target.push_str(request.path());

    let query = encode_query(request.query_params());
    if !query.is_empty() {
        target.push('?');
        target.push_str(&query);
    }
    target
}

/// Percent-encode ordered key/value pairs as `k=v&k=v`.
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY),
                utf8_percent_encode(value, QUERY)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Find the position of the header/body separator (\r\n\r\n).
///
/// Returns the index of the first `\r` in the separator, or None if not found.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the status line and header lines of a response head.
///
/// `head` must not include the terminating blank line.
pub fn parse_head(head: &[u8]) -> Result<(u16, Headers), TransportError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| TransportError::malformed("invalid UTF-8 in response headers"))?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut tokens = status_line.split(' ').filter(|t| !t.is_empty());
    let (Some(_version), Some(code)) = (tokens.next(), tokens.next()) else {
        return Err(TransportError::malformed(format!(
            "status line {status_line:?} has too few fields"
        )));
    };
    let status: u16 = code
        .parse()
        .map_err(|_| TransportError::malformed(format!("status code {code:?} is not a number")))?;

    let mut headers = Headers::new();
    for line in lines {
        match line.split_once(':') {
            Some((name, value)) => headers.insert(name.trim(), value.trim()),
            None if line.is_empty() => {}
            None => tracing::debug!(line, "ignoring header line without a colon"),
        }
    }

    Ok((status, headers))
}

/// Parse a complete response read up to end-of-stream.
///
/// Chunked bodies are decoded; other bodies are returned as-is.
pub fn parse_response(raw: Bytes) -> Result<Response, TransportError> {
    let header_end = find_header_end(&raw)
        .ok_or_else(|| TransportError::malformed("no header terminator in response"))?;
    let (status, headers) = parse_head(&raw[..header_end])?;

    let body = raw.slice(header_end + 4..);
    let body = if headers.is_chunked() {
        chunked::decode(&body)
    } else {
        body
    };

    tracing::debug!(status, body_len = body.len(), "parsed response");
    Ok(Response::new(status, headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    #[test]
    fn request_frame_layout() {
        let request = Request::get("/localapi/v0/status").query("peers", "false");
        let frame = encode_request(&request, 115, ConnectionMode::Close);

        assert_eq!(
            std::str::from_utf8(&frame).unwrap(),
            "GET /localapi/v0/status?peers=false HTTP/1.1\r\n\
             Accept: application/json\r\n\
             Connection: close\r\n\
             Host: local-tailscaled.sock\r\n\
             Tailscale-Cap: 115\r\n\
             \r\n"
        );
    }

    #[test]
    fn body_adds_content_length() {
        let request = Request::new(Method::Patch, "localapi/v0/prefs").body(&b"{}"[..]);
        let frame = encode_request(&request, 1, ConnectionMode::KeepAlive);
        let text = std::str::from_utf8(&frame).unwrap();

        assert!(text.starts_with("PATCH /localapi/v0/prefs HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn caller_headers_replace_defaults() {
        let request = Request::get("/").header("accept", "text/plain");
        let frame = encode_request(&request, 1, ConnectionMode::Close);
        let text = std::str::from_utf8(&frame).unwrap();

        assert!(text.contains("accept: text/plain\r\n"));
        assert!(!text.contains("application/json"));
    }

    #[test]
    fn query_is_percent_encoded() {
        let params = vec![
            ("ip".to_string(), "100.64.0.1:22".to_string()),
            ("name".to_string(), "a b&c".to_string()),
        ];
        assert_eq!(encode_query(&params), "ip=100.64.0.1%3A22&name=a%20b%26c");
    }

    #[test]
    fn parse_plain_response() {
        let raw = Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Weird:  spaced  \r\n\r\n{\"ok\":true}",
        );
        let response = parse_response(raw).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.headers().get("x-weird"), Some("spaced"));
        assert_eq!(response.body().as_ref(), b"{\"ok\":true}");
    }

    #[test]
    fn parse_chunked_response() {
        let raw = Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        );
        let response = parse_response(raw).unwrap();
        assert_eq!(response.body().as_ref(), b"hello world");
    }

    #[test]
    fn missing_separator_is_malformed() {
        let raw = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n");
        assert!(matches!(
            parse_response(raw),
            Err(TransportError::MalformedResponse(_))
        ));
    }

    #[test]
    fn bad_status_lines_are_malformed() {
        for raw in [
            &b"HTTP/1.1\r\n\r\n"[..],
            &b"HTTP/1.1 OK fine\r\n\r\n"[..],
            &b"\xff\xfe 200\r\n\r\n"[..],
        ] {
            assert!(matches!(
                parse_response(Bytes::copy_from_slice(raw)),
                Err(TransportError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn error_statuses_are_still_responses() {
        let raw = Bytes::from_static(b"HTTP/1.1 403 Forbidden\r\n\r\naccess denied");
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status(), 403);
        assert!(!response.is_success());
    }

    /// Parse a frame with `httparse`, returning the request, the decoded
    /// query and the body.
    fn parse_with_httparse(
        frame: &[u8],
    ) -> (String, String, Vec<(String, String)>, BTreeMap<String, String>, Vec<u8>) {
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        let httparse::Status::Complete(head_len) = parsed.parse(frame).unwrap() else {
            panic!("incomplete request head");
        };
        assert_eq!(parsed.version, Some(1));

        let target = parsed.path.unwrap();
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let headers = parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    std::str::from_utf8(h.value).unwrap().to_string(),
                )
            })
            .collect();

        (
            parsed.method.unwrap().to_string(),
            path.to_string(),
            query,
            headers,
            frame[head_len..].to_vec(),
        )
    }

    #[test]
    fn independent_parser_reads_encoded_requests() {
        let request = Request::get("/localapi/v0/status")
            .query("peers", "false")
            .query("name", "a b&c=d")
            .header("A", "1")
            .header("B", "2");
        let frame = encode_request(&request, 115, ConnectionMode::Close);

        let (method, path, query, headers, body) = parse_with_httparse(&frame);

        assert_eq!(method, "GET");
        assert_eq!(path, "/localapi/v0/status");
        assert_eq!(
            query,
            vec![
                ("peers".to_string(), "false".to_string()),
                ("name".to_string(), "a b&c=d".to_string()),
            ]
        );
        let expected: BTreeMap<String, String> = [
            ("A", "1"),
            ("Accept", "application/json"),
            ("B", "2"),
            ("Connection", "close"),
            ("Host", HOST_PLACEHOLDER),
            ("Tailscale-Cap", "115"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(headers, expected);
        assert!(body.is_empty());
    }

    #[test]
    fn independent_parser_reads_request_bodies() {
        let request = Request::new(Method::Post, "/localapi/v0/ping")
            .header("Content-Type", "application/json")
            .body(r#"{"ip":"100.64.0.1"}"#);
        let frame = encode_request(&request, 7, ConnectionMode::KeepAlive);

        let (method, path, query, headers, body) = parse_with_httparse(&frame);

        assert_eq!(method, "POST");
        assert_eq!(path, "/localapi/v0/ping");
        assert!(query.is_empty());
        assert_eq!(headers["Content-Length"], "19");
        assert_eq!(headers["Connection"], "keep-alive");
        assert_eq!(headers["Tailscale-Cap"], "7");
        assert_eq!(body, br#"{"ip":"100.64.0.1"}"#);
    }
}
