//! Testing utilities for the transport layer.
//!
//! Helpers for writing fake local API servers: a parser for the request
//! frames the socket transport writes, builders for response frames and
//! chunked bodies, and [`MockDaemon`], a Unix socket server driven by a
//! handler closure.

#[cfg(unix)]
mod daemon;

#[cfg(unix)]
pub use daemon::{MockDaemon, Reply};

use std::io;

use bytes::{Bytes, BytesMut};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::find_header_end;

/// A request frame as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// The raw request target, including any query string.
    pub target: String,
    pub path: String,
    /// Decoded query parameters in the order they were sent.
    pub query: Vec<(String, String)>,
    /// Headers in wire order, with their original case.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ParsedRequest {
    /// Look up a header value, ignoring the case of the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Header names in wire order.
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Parse a complete request frame: head, blank line and body.
///
/// The body is everything after the blank line; `Content-Length` is not
/// checked here.
pub fn parse_request_frame(frame: &[u8]) -> io::Result<ParsedRequest> {
    let head_end = find_header_end(frame).ok_or_else(|| invalid("no header terminator"))?;
    let head = std::str::from_utf8(&frame[..head_end]).map_err(|_| invalid("head is not UTF-8"))?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("short request line"));
    };
    if version != "HTTP/1.1" {
        return Err(invalid("unexpected HTTP version"));
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, decode_query(query)?),
        None => (target, Vec::new()),
    };

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid("header line without a colon"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ParsedRequest {
        method: method.to_string(),
        target: target.to_string(),
        path: path.to_string(),
        query,
        headers,
        body: Bytes::copy_from_slice(&frame[head_end + 4..]),
    })
}

/// Read one request frame from `reader`, including a `Content-Length` body.
///
/// Returns `Ok(None)` if the peer closed before sending anything.
pub async fn read_request_frame<R>(reader: &mut R) -> io::Result<Option<ParsedRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        if reader.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request head",
            ));
        }
    };

    let mut request = parse_request_frame(&buf[..head_end + 4])?;
    let content_length = match request.header("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| invalid("bad content-length"))?,
        None => 0,
    };

    let body_start = head_end + 4;
    while buf.len() < body_start + content_length {
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request body",
            ));
        }
    }
    request.body = Bytes::copy_from_slice(&buf[body_start..body_start + content_length]);
    Ok(Some(request))
}

/// Build a response frame. No headers are added.
///
/// # Example
///
/// ```
/// use transport::testing::response_frame;
///
/// let frame = response_frame(200, &[("Content-Type", "application/json")], b"{}");
/// assert!(frame.starts_with(b"HTTP/1.1 200 OK\r\n"));
/// ```
pub fn response_frame(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut frame = format!("HTTP/1.1 {status} {}\r\n", reason(status));
    for (name, value) in headers {
        frame.push_str(&format!("{name}: {value}\r\n"));
    }
    frame.push_str("\r\n");

    let mut frame = frame.into_bytes();
    frame.extend_from_slice(body);
    frame
}

/// Encode `chunks` with chunked transfer-encoding, including the final
/// zero-length chunk.
pub fn encode_chunks<T: AsRef<[u8]>>(chunks: &[T]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(encode_chunk(chunk.as_ref()).as_slice());
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Encode a single chunk, without the terminator.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn decode_query(query: &str) -> io::Result<Vec<(String, String)>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(component: &str) -> io::Result<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| invalid("query is not UTF-8"))
}

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
