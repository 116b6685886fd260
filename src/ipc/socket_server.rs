use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;

use crate::decision::Outcome;
use crate::error::{Result, StopkranError};
use crate::ipc::{IpcRequest, IpcResponse, MAX_REQUEST_BYTES};

/// Boxed future returned by a request handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<IpcResponse>> + Send>>;

/// Unix socket server for hook clients.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown_signal: Arc<Notify>,
    read_timeout: Duration,
    grace_period: Duration,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown_signal: Arc::new(Notify::new()),
            read_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(5),
        }
    }

    /// How long a client may take to send its request line.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How long in-flight connections may drain after shutdown before they
    /// are answered with `timed_out`.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Bind the socket endpoint. A live endpoint means another daemon owns
    /// it; a dead one is removed and the bind retried once.
    pub async fn bind(&self) -> Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = match UnixListener::bind(&self.socket_path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if UnixStream::connect(&self.socket_path).await.is_ok() {
                    return Err(StopkranError::Bind {
                        path: self.socket_path.clone(),
                        reason: "daemon already running".into(),
                    });
                }
                tracing::warn!(path = %self.socket_path.display(), "removing stale socket");
                std::fs::remove_file(&self.socket_path)?;
                UnixListener::bind(&self.socket_path).map_err(|e| self.bind_error(e))?
            }
            Err(e) => return Err(self.bind_error(e)),
        };

        crate::config::set_file_permissions_0600(&self.socket_path);
        Ok(listener)
    }

    fn bind_error(&self, e: std::io::Error) -> StopkranError {
        StopkranError::Bind {
            path: self.socket_path.clone(),
            reason: e.to_string(),
        }
    }

    /// Bind and serve until `shutdown` is called.
    pub async fn serve<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(IpcRequest) -> HandlerFuture + Send + Sync + 'static,
    {
        let listener = self.bind().await?;
        self.serve_listener(listener, handler).await
    }

    /// Serve on an already bound listener. Each connection is handled in a
    /// spawned task.
    pub async fn serve_listener<F>(&self, listener: UnixListener, handler: F) -> Result<()>
    where
        F: Fn(IpcRequest) -> HandlerFuture + Send + Sync + 'static,
    {
        tracing::info!(path = %self.socket_path.display(), "listening for hook clients");

        let handler = Arc::new(handler);
        let (force_close_tx, force_close_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let handler = handler.clone();
                            let force_close = force_close_rx.clone();
                            let read_timeout = self.read_timeout;
                            connections.spawn(async move {
                                let handled =
                                    handle_connection(stream, handler, read_timeout, force_close);
                                if let Err(e) = handled.await {
                                    tracing::warn!(error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept error");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = self.shutdown_signal.notified() => {
                    tracing::info!("socket server shutting down");
                    break;
                }
            }
        }

        drop(listener);
        let _ = std::fs::remove_file(&self.socket_path);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace_period, drain).await.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "grace period elapsed, force-closing connections"
            );
            let _ = force_close_tx.send(true);
            while connections.join_next().await.is_some() {}
        }

        Ok(())
    }

    /// Stop accepting and begin draining.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_signal.notify_one();
        Ok(())
    }
}

/// Handle a single client connection: one request in, one response out.
async fn handle_connection<F>(
    stream: UnixStream,
    handler: Arc<F>,
    read_timeout: Duration,
    mut force_close: watch::Receiver<bool>,
) -> Result<()>
where
    F: Fn(IpcRequest) -> HandlerFuture + Send + Sync + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    let read = tokio::time::timeout(read_timeout, buf_reader.read_line(&mut line)).await;
    let parsed = match read {
        Err(_) => Err(StopkranError::MalformedRequest {
            reason: "timed out waiting for request".into(),
        }),
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => IpcRequest::parse(&line),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(StopkranError::MalformedRequest {
                reason: "request is not valid UTF-8".into(),
            })
        }
        Ok(Err(e)) => {
            return Err(StopkranError::Ipc {
                reason: format!("read failed: {}", e),
            })
        }
    };

    let request = match parsed {
        Ok(request) => request,
        Err(e) => {
            let response = IpcResponse::from(Outcome::errored(e.to_string()));
            write_response(&mut writer, &response).await;
            return Err(e);
        }
    };

    let hint = request.request_id.clone();
    let response = tokio::select! {
        result = handler(request) => match result {
            Ok(response) => response,
            Err(e) => IpcResponse::from(Outcome::errored(e.to_string())),
        },
        _ = wait_for_force_close(&mut force_close) => IpcResponse::from(Outcome::TimedOut),
    };

    tracing::debug!(hint = ?hint, outcome = %response.outcome, "writing response");
    write_response(&mut writer, &response).await;
    Ok(())
}

async fn wait_for_force_close(force_close: &mut watch::Receiver<bool>) {
    while !*force_close.borrow() {
        if force_close.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Write the response line and close. The client may already be gone, so
/// failures are logged and swallowed.
async fn write_response(writer: &mut OwnedWriteHalf, response: &IpcResponse) {
    let mut json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            return;
        }
    };
    json.push('\n');
    if let Err(e) = writer.write_all(json.as_bytes()).await {
        tracing::debug!(error = %e, "client went away before response");
        return;
    }
    let _ = writer.shutdown().await;
}
