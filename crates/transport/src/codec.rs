//! Event stream decoding.
//!
//! [`EventStreamCodec`] turns the bytes of a long-lived HTTP response into
//! newline-delimited events. It reads the response head, checks the status,
//! and then follows either chunked framing or a raw byte stream. Each
//! complete line of body data becomes one [`Frame::Line`].
//!
//! Chunk boundaries and line boundaries are independent: a chunk may hold
//! several lines, and a line may span several chunks and several socket
//! reads. Bytes are only released once a newline is seen.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::chunked;
use crate::error::CodecError;
use crate::http;

/// Default maximum length of a single event line (16 MB).
const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// An item produced by [`EventStreamCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One event line, without its trailing newline.
    Line(Bytes),
    /// The server sent the terminating zero-length chunk.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    AwaitingSize,
    AwaitingData { remaining: usize },
    AwaitingTrailingCrlf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Raw,
    Chunked(ChunkState),
    Finished,
}

/// Decoder for streaming local API responses.
#[derive(Debug)]
pub struct EventStreamCodec {
    phase: Phase,
    line: BytesMut,
    /// Bytes at the front of `line` already known to hold no newline.
    scanned: usize,
    max_line_length: usize,
}

impl EventStreamCodec {
    /// Codec for a raw socket: starts by parsing the response head.
    pub fn new() -> Self {
        Self {
            phase: Phase::Head,
            line: BytesMut::new(),
            scanned: 0,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Codec for a body whose head and transfer encoding have already been
    /// handled, for example by an HTTP client library.
    pub fn body_only() -> Self {
        Self {
            phase: Phase::Raw,
            ..Self::new()
        }
    }

    /// Set the maximum event line length.
    ///
    /// Longer lines are rejected with [`CodecError::LineTooLong`].
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Pop the next complete, non-empty line from the line buffer.
    ///
    /// Only bytes appended since the last call are searched for a newline.
    fn take_line(&mut self) -> Result<Option<Bytes>, CodecError> {
        while let Some(offset) = self.line[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            self.scanned = 0;

            let mut line = self.line.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }
            if !line.is_empty() {
                return Ok(Some(line.freeze()));
            }
        }
        self.scanned = self.line.len();

        if self.line.len() > self.max_line_length {
            return Err(CodecError::LineTooLong {
                size: self.line.len(),
                max: self.max_line_length,
            });
        }
        Ok(None)
    }

    fn discard_partial_line(&mut self) {
        if !self.line.is_empty() {
            tracing::warn!(
                len = self.line.len(),
                "connection closed mid-line, dropping unterminated event"
            );
            self.line.clear();
        }
        self.scanned = 0;
    }
}

impl Default for EventStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventStreamCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(line) = self.take_line()? {
                return Ok(Some(Frame::Line(line)));
            }

            match self.phase {
                Phase::Head => {
                    let Some(header_end) = http::find_header_end(src) else {
                        return Ok(None);
                    };
                    let (status, headers) = http::parse_head(&src[..header_end])?;
                    src.advance(header_end + 4);

                    if status != 200 {
                        return Err(CodecError::Malformed(format!(
                            "unexpected status {status} for streaming request"
                        )));
                    }

                    let chunked = headers.is_chunked();
                    tracing::debug!(chunked, "event stream started");
                    self.phase = if chunked {
                        Phase::Chunked(ChunkState::AwaitingSize)
                    } else {
                        Phase::Raw
                    };
                }
                Phase::Raw => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let data = src.split();
                    self.line.extend_from_slice(&data);
                }
                Phase::Chunked(ChunkState::AwaitingSize) => {
                    let Some(line_end) = chunked::find_crlf(src) else {
                        return Ok(None);
                    };
                    let size = chunked::parse_chunk_size(&src[..line_end]).ok_or_else(|| {
                        CodecError::Malformed(format!(
                            "invalid chunk size line {:?}",
                            String::from_utf8_lossy(&src[..line_end])
                        ))
                    })?;
                    src.advance(line_end + 2);
                    tracing::trace!(size, "chunk header");

                    self.phase = if size == 0 {
                        Phase::Finished
                    } else {
                        Phase::Chunked(ChunkState::AwaitingData { remaining: size })
                    };
                }
                Phase::Chunked(ChunkState::AwaitingData { remaining }) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(src.len());
                    let data = src.split_to(take);
                    self.line.extend_from_slice(&data);

                    self.phase = if take == remaining {
                        Phase::Chunked(ChunkState::AwaitingTrailingCrlf)
                    } else {
                        Phase::Chunked(ChunkState::AwaitingData {
                            remaining: remaining - take,
                        })
                    };
                }
                Phase::Chunked(ChunkState::AwaitingTrailingCrlf) => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(CodecError::Malformed(
                            "chunk data not followed by CRLF".to_string(),
                        ));
                    }
                    src.advance(2);
                    self.phase = Phase::Chunked(ChunkState::AwaitingSize);
                }
                Phase::Finished => return Ok(Some(Frame::End)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.phase {
            Phase::Head => Err(CodecError::Malformed(
                "connection closed before response headers were complete".to_string(),
            )),
            Phase::Chunked(state) => {
                tracing::debug!(?state, "connection closed before the terminating chunk");
                self.discard_partial_line();
                Ok(None)
            }
            Phase::Raw | Phase::Finished => {
                self.discard_partial_line();
                Ok(None)
            }
        }
    }
}
