//! Chunked transfer-encoding.
//!
//! ```text
//! <hex size>[;extension]\r\n
//! <size bytes of data>\r\n
//! ...
//! 0\r\n
//! \r\n
//! ```
//!
//! [`decode`] works on a complete body and is lenient: framing it cannot
//! follow ends decoding, and whatever was decoded up to that point is
//! returned. The streaming decoder in [`crate::codec`] shares the header
//! parsing but waits for more bytes instead.

use bytes::{Bytes, BytesMut};

/// Find the next `\r\n`, returning the index of the `\r`.
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse a chunk-size line (without its CRLF), ignoring chunk extensions.
pub fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?;
    let size = line.split(';').next()?.trim();
    if size.is_empty() {
        return None;
    }
    usize::from_str_radix(size, 16).ok()
}

/// Decode a complete chunked body.
///
/// Only whole chunks are copied to the output; a truncated final chunk is
/// dropped.
pub fn decode(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len());
    let mut rest = body;

    loop {
        let Some(line_end) = find_crlf(rest) else {
            tracing::warn!(decoded = out.len(), "chunked body ended without a terminating chunk");
            break;
        };
        let Some(size) = parse_chunk_size(&rest[..line_end]) else {
            tracing::warn!(
                line = %String::from_utf8_lossy(&rest[..line_end]),
                decoded = out.len(),
                "invalid chunk size line"
            );
            break;
        };
        if size == 0 {
            break;
        }

        let data = &rest[line_end + 2..];
        if data.len() < size {
            tracing::warn!(
                expected = size,
                available = data.len(),
                "chunk data truncated"
            );
            break;
        }
        out.extend_from_slice(&data[..size]);
        tracing::trace!(size, "decoded chunk");

        // skip the CRLF trailing the data
        rest = data.get(size + 2..).unwrap_or_default();
    }

    out.freeze()
}
