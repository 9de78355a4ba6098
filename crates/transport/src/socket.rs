//! HTTP over a Unix domain socket.
//!
//! The platform HTTP client cannot dial a socket path, so requests are
//! framed by hand (see [`crate::http`]) and written straight to the socket.

use std::io;
use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::EventStreamCodec;
use crate::error::TransportError;
use crate::http::{self, ConnectionMode};
use crate::request::{Request, Response};
use crate::stream::EventStream;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Transport for [`Endpoint::UnixSocket`](discovery::Endpoint::UnixSocket).
///
/// Stateless: every call opens its own connection, and the connection is
/// closed when the call returns or, for streams, when the stream is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSocketTransport;

impl UnixSocketTransport {
    pub fn new() -> Self {
        Self
    }

    /// Send one request and read the response until the server closes.
    ///
    /// # Errors
    ///
    /// - [`TransportError::SocketNotFound`] if `path` does not exist
    /// - [`TransportError::ConnectionRefused`] if nothing is listening
    /// - [`TransportError::NetworkFailure`] for other I/O errors
    /// - [`TransportError::MalformedResponse`] if the reply is not HTTP
    pub async fn send(
        &self,
        path: &Path,
        request: &Request,
        capability_version: u32,
    ) -> Result<Response, TransportError> {
        tracing::debug!(path = %path.display(), method = %request.method(), target = request.path(), "sending request over socket");
        let stream = connect(path).await?;
        exchange(stream, &path.display().to_string(), request, capability_version).await
    }

    /// Send a request and stream the response body line by line.
    ///
    /// Connection failures are returned directly. Problems with the response
    /// itself (bad status, bad framing) arrive as the stream's final item.
    ///
    /// # Errors
    ///
    /// Same connection errors as [`UnixSocketTransport::send`].
    pub async fn send_streaming(
        &self,
        path: &Path,
        request: &Request,
        capability_version: u32,
    ) -> Result<EventStream, TransportError> {
        tracing::debug!(path = %path.display(), target = request.path(), "opening event stream over socket");
        let stream = connect(path).await?;
        open_stream(stream, path.display().to_string(), request, capability_version).await
    }
}

#[cfg(unix)]
async fn connect(path: &Path) -> Result<tokio::net::UnixStream, TransportError> {
    tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| crate::error::connect_error(path, e))
}

#[cfg(not(unix))]
async fn connect(_path: &Path) -> Result<tokio::io::DuplexStream, TransportError> {
    Err(TransportError::Unimplemented("unix domain sockets"))
}

/// Run a single request/response exchange over an open connection.
///
/// `stream` is dropped, and so closed, before this returns.
pub async fn exchange<S>(
    mut stream: S,
    endpoint: &str,
    request: &Request,
    capability_version: u32,
) -> Result<Response, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = http::encode_request(request, capability_version, ConnectionMode::Close);
    write_frame(&mut stream, &frame, endpoint).await?;

    let mut raw = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        raw.reserve(READ_BUFFER_SIZE);
        match stream.read_buf(&mut raw).await {
            Ok(0) => break,
            Ok(n) => tracing::trace!(n, "read response bytes"),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::network(endpoint, e)),
        }
    }
    drop(stream);

    tracing::debug!(len = raw.len(), "response complete");
    http::parse_response(raw.freeze())
}

/// Write a streaming request and hand the connection to an [`EventStream`].
pub async fn open_stream<S>(
    mut stream: S,
    endpoint: String,
    request: &Request,
    capability_version: u32,
) -> Result<EventStream, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let frame = http::encode_request(request, capability_version, ConnectionMode::KeepAlive);
    write_frame(&mut stream, &frame, &endpoint).await?;
    Ok(EventStream::spawn(stream, EventStreamCodec::new(), endpoint))
}

async fn write_frame<S>(stream: &mut S, frame: &[u8], endpoint: &str) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    tracing::trace!(len = frame.len(), "writing request frame");
    // write_all loops over partial writes
    stream
        .write_all(frame)
        .await
        .map_err(|e| TransportError::network(endpoint, e))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::network(endpoint, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::read_request_frame;
    use futures::StreamExt;
    use tokio::io::duplex;

    #[tokio::test]
    async fn exchange_over_memory_stream() {
        let (client, mut server) = duplex(4096);

        let server_task = tokio::spawn(async move {
            let request = read_request_frame(&mut server).await.unwrap().unwrap();
            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{}")
                .await
                .unwrap();
            request
        });

        let request = Request::get("/localapi/v0/status");
        let response = exchange(client, "memory", &request, 7).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"{}");

        let seen = server_task.await.unwrap();
        assert_eq!(seen.path, "/localapi/v0/status");
        assert_eq!(seen.header("connection"), Some("close"));
        assert_eq!(seen.header("tailscale-cap"), Some("7"));
    }

    #[tokio::test]
    async fn stream_over_memory_stream() {
        let (client, mut server) = duplex(4096);

        let mut events = open_stream(client, "memory".into(), &Request::get("/localapi/v0/watch-ipn-bus"), 1)
            .await
            .unwrap();

        let request = read_request_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(request.header("connection"), Some("keep-alive"));

        server
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n6\r\n{\"x\"}\n\r\n0\r\n\r\n")
            .await
            .unwrap();

        assert_eq!(events.next().await.unwrap().unwrap(), "{\"x\"}");
        assert!(events.next().await.is_none());
    }
}
