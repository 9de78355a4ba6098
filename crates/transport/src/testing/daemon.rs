//! A fake local API daemon on a Unix socket.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{ParsedRequest, read_request_frame};

/// What a [`MockDaemon`] sends back for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write these bytes, then close the connection.
    Close(Vec<u8>),
    /// Write these bytes, then keep the connection open until the client
    /// closes it.
    Hold(Vec<u8>),
}

type Handler = dyn Fn(&ParsedRequest) -> Reply + Send + Sync;

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<ParsedRequest>>,
    closed_by_client: AtomicUsize,
    closed: Notify,
}

/// Serves each accepted connection with `handler` and records every request.
///
/// The accept loop stops when the daemon is dropped.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> std::io::Result<()> {
/// use transport::testing::{MockDaemon, Reply, response_frame};
///
/// let dir = tempfile::tempdir()?;
/// let daemon = MockDaemon::bind(dir.path().join("tailscaled.sock"), |_request| {
///     Reply::Close(response_frame(200, &[], b"{}"))
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct MockDaemon {
    path: PathBuf,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl MockDaemon {
    /// Bind a listener at `path` and start serving.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind<F>(path: impl Into<PathBuf>, handler: F) -> io::Result<Self>
    where
        F: Fn(&ParsedRequest) -> Reply + Send + Sync + 'static,
    {
        let path = path.into();
        let listener = UnixListener::bind(&path)?;
        let shared = Arc::new(Shared::default());
        let handler: Arc<Handler> = Arc::new(handler);

        let accept = tokio::spawn(accept_loop(listener, handler, Arc::clone(&shared)));
        tracing::debug!(path = %path.display(), "mock daemon listening");

        Ok(Self {
            path,
            shared,
            accept,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ParsedRequest> {
        match self.shared.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of held connections the client has closed.
    pub fn closed_by_client(&self) -> usize {
        self.shared.closed_by_client.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` held connections have been closed by the
    /// client.
    pub async fn wait_for_client_close(&self, count: usize) {
        loop {
            let notified = self.shared.closed.notified();
            if self.closed_by_client() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

impl std::fmt::Debug for MockDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDaemon")
            .field("path", &self.path)
            .field("closed_by_client", &self.closed_by_client())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(listener: UnixListener, handler: Arc<Handler>, shared: Arc<Shared>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "mock daemon accept failed");
                return;
            }
        };
        tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&shared)));
    }
}

async fn serve(mut stream: UnixStream, handler: Arc<Handler>, shared: Arc<Shared>) {
    let request = match read_request_frame(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, "mock daemon could not read request");
            return;
        }
    };
    tracing::debug!(method = %request.method, target = %request.target, "mock daemon request");

    let reply = handler(&request);
    match shared.requests.lock() {
        Ok(mut requests) => requests.push(request),
        Err(poisoned) => poisoned.into_inner().push(request),
    }

    match reply {
        Reply::Close(bytes) => {
            if let Err(e) = stream.write_all(&bytes).await {
                tracing::debug!(error = %e, "mock daemon write failed");
            }
            let _ = stream.shutdown().await;
        }
        Reply::Hold(bytes) => {
            if let Err(e) = stream.write_all(&bytes).await {
                tracing::debug!(error = %e, "mock daemon write failed");
            }
            // anything the client sends after the request is discarded
            let mut sink = [0u8; 1024];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::debug!("client closed held connection");
            shared.closed_by_client.fetch_add(1, Ordering::SeqCst);
            shared.closed.notify_waiters();
        }
    }
}
