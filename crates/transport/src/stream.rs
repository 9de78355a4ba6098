//! Live event streams.
//!
//! A streaming request hands its connection to a background task that reads,
//! decodes and forwards events. The caller sees an [`EventStream`]. Dropping
//! it cancels the task, and the task drops the connection, which closes the
//! socket. There is no other cleanup path.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Decoder;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::codec::{EventStreamCodec, Frame};
use crate::error::TransportError;

const READ_BUFFER_SIZE: usize = 8 * 1024;

pin_project! {
    /// An async stream of event lines from the local API.
    ///
    /// Each item is one line of the response body, normally one JSON object.
    /// The stream ends when the server sends its final chunk or closes the
    /// connection. After an error item the stream ends. If the connection
    /// closes in the middle of a line, that partial line is dropped with a
    /// warning.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let mut events = config.send_streaming(&request).await?;
    /// while let Some(event) = events.next().await {
    ///     let line = event?;
    ///     println!("{}", String::from_utf8_lossy(&line));
    /// }
    /// ```
    #[derive(Debug)]
    pub struct EventStream {
        #[pin]
        inner: ReceiverStream<Result<Bytes, TransportError>>,
        guard: DropGuard,
    }
}

impl EventStream {
    /// Spawn a reader task over `reader` and return the consumer side.
    ///
    /// `endpoint` is only used to label errors.
    pub(crate) fn spawn<R>(reader: R, codec: EventStreamCodec, endpoint: String) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        // capacity 1: events are handed over as soon as they are framed
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        tokio::spawn(pump(reader, codec, tx, cancel.clone(), endpoint));

        Self {
            inner: ReceiverStream::new(rx),
            guard: cancel.drop_guard(),
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Read, decode and forward until the stream ends, fails or is cancelled.
///
/// `reader` is dropped on every return path.
async fn pump<R>(
    mut reader: R,
    mut codec: EventStreamCodec,
    tx: mpsc::Sender<Result<Bytes, TransportError>>,
    cancel: CancellationToken,
    endpoint: String,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut eof = false;

    loop {
        loop {
            let decoded = if eof {
                codec.decode_eof(&mut buf)
            } else {
                codec.decode(&mut buf)
            };
            match decoded {
                Ok(Some(Frame::Line(line))) => {
                    tracing::trace!(len = line.len(), "event received");
                    if !deliver(&tx, &cancel, Ok(line)).await {
                        tracing::debug!("event stream consumer went away");
                        return;
                    }
                }
                Ok(Some(Frame::End)) => {
                    tracing::debug!("server ended event stream");
                    return;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "event stream decode failed");
                    deliver(&tx, &cancel, Err(e.into_transport(&endpoint))).await;
                    return;
                }
            }
        }

        if eof {
            tracing::debug!("event stream closed by server");
            return;
        }

        buf.reserve(READ_BUFFER_SIZE);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("event stream cancelled");
                return;
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => eof = true,
                Ok(n) => tracing::trace!(n, "read event bytes"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "event stream read failed");
                    deliver(&tx, &cancel, Err(TransportError::network(&endpoint, e))).await;
                    return;
                }
            }
        }
    }
}

/// Hand an item to the consumer. Returns false if it is gone.
async fn deliver(
    tx: &mpsc::Sender<Result<Bytes, TransportError>>,
    cancel: &CancellationToken,
    item: Result<Bytes, TransportError>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn forwards_lines_in_order() {
        let (client, mut server) = duplex(1024);
        let mut events = EventStream::spawn(client, EventStreamCodec::body_only(), "test".into());

        server.write_all(b"one\ntwo\nthree\n").await.unwrap();
        drop(server);

        let mut lines = Vec::new();
        while let Some(event) = events.next().await {
            lines.push(event.unwrap());
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn decode_error_ends_stream() {
        let (client, mut server) = duplex(1024);
        let mut events = EventStream::spawn(client, EventStreamCodec::new(), "test".into());

        server.write_all(b"HTTP/1.1 500 Internal Server Error\r\n\r\n").await.unwrap();

        let first = events.next().await.unwrap();
        assert!(matches!(first, Err(TransportError::MalformedResponse(_))));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn interrupted_reads_are_retried_other_errors_end_the_stream() {
        let reader = tokio_test::io::Builder::new()
            .read(b"one\n")
            .read_error(io::Error::from(io::ErrorKind::Interrupted))
            .read(b"two\n")
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let mut events = EventStream::spawn(reader, EventStreamCodec::body_only(), "test".into());

        assert_eq!(events.next().await.unwrap().unwrap(), "one");
        assert_eq!(events.next().await.unwrap().unwrap(), "two");
        assert!(matches!(
            events.next().await,
            Some(Err(TransportError::NetworkFailure { ref endpoint, .. })) if endpoint == "test"
        ));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_reader() {
        let (client, mut server) = duplex(1024);
        let mut events = EventStream::spawn(client, EventStreamCodec::body_only(), "test".into());

        server.write_all(b"first\n").await.unwrap();
        assert_eq!(events.next().await.unwrap().unwrap(), "first");
        drop(events);

        // once the task drops its half, reads on the other half see EOF
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), server.read(&mut buf))
            .await
            .expect("reader was not closed after cancellation")
            .unwrap();
        assert_eq!(n, 0);
    }
}
