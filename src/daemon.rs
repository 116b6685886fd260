use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::decision::{ActionPayload, Outcome};
use crate::error::{Result, StopkranError};
use crate::ipc::socket_server::{HandlerFuture, IpcServer};
use crate::ipc::{IpcRequest, IpcResponse};
use crate::pause::PauseChecker;
use crate::pending::PendingTable;
use crate::transport::ChannelTransport;

/// Cleans up after a `submit` future that is dropped before its request
/// terminates (connection force-closed at shutdown): the table entry is
/// discarded and the transport forgets the prompt it will never finalize.
struct CancelGuard<'a> {
    daemon: &'a Daemon,
    id: &'a str,
    armed: bool,
}

impl CancelGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.daemon.table.discard(self.id);
            self.daemon.transport.forget(self.id);
        }
    }
}

/// The mediation daemon: pause gate, pending table, channel transport and
/// socket server composed into one process.
pub struct Daemon {
    table: Arc<PendingTable>,
    transport: Arc<dyn ChannelTransport>,
    pause: Arc<dyn PauseChecker>,
    timeout: Duration,
}

impl Daemon {
    /// `timeout` must be shorter than the hook client's own receive deadline.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        pause: Arc<dyn PauseChecker>,
        timeout: Duration,
    ) -> Self {
        Self {
            table: Arc::new(PendingTable::new()),
            transport,
            pause,
            timeout,
        }
    }

    pub fn table(&self) -> &Arc<PendingTable> {
        &self.table
    }

    /// Mediate one request from start to terminal outcome.
    pub async fn submit(&self, payload: ActionPayload) -> Outcome {
        if self.pause.is_paused() {
            tracing::info!(tool = %payload.tool_name, "paused, deferring to native prompt");
            return Outcome::Deferred;
        }

        let hint = payload.hint.clone();
        let id = self.table.register(payload.clone());
        let mut guard = CancelGuard {
            daemon: self,
            id: &id,
            armed: true,
        };
        let deadline = self.table.created_at(&id).unwrap_or_else(Instant::now) + self.timeout;
        tracing::info!(
            request_id = %id,
            hint = ?hint,
            tool = %payload.tool_name,
            session = %payload.session_id,
            "request received"
        );

        if let Err(e) = self.transport.send_prompt(&id, &payload).await {
            let e = match e {
                e @ StopkranError::TransportUnavailable { .. } => e,
                e if e.is_transport_failure() => StopkranError::TransportUnavailable {
                    reason: e.to_string(),
                },
                e => e,
            };
            tracing::warn!(request_id = %id, error = %e, "prompt dispatch failed");
            guard.disarm();
            return self.table.fail(&id, &e.to_string());
        }

        let outcome = self.table.await_resolution(&id, deadline).await;
        guard.disarm();
        tracing::info!(request_id = %id, outcome = %outcome, "request resolved");

        let transport = self.transport.clone();
        let finalized = outcome.clone();
        let finalized_id = id.clone();
        tokio::spawn(async move {
            transport.finalize(&finalized_id, &finalized).await;
        });

        outcome
    }

    /// Bind the socket, start the decision listener and serve hook clients
    /// until `shutdown` completes. A bind failure is returned before anything
    /// else starts.
    pub async fn run<S>(self: Arc<Self>, server: IpcServer, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let listener = server.bind().await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let transport = self.transport.clone();
        let table = self.table.clone();
        let listener_task = tokio::spawn(async move {
            transport.listen(table, stop_rx).await;
        });

        let daemon = self.clone();
        let handler = move |request: IpcRequest| -> HandlerFuture {
            let daemon = daemon.clone();
            Box::pin(async move {
                let outcome = daemon.submit(request.into_payload()).await;
                Ok(IpcResponse::from(outcome))
            })
        };

        let serve = server.serve_listener(listener, handler);
        tokio::pin!(serve);
        tokio::pin!(shutdown);

        let served = tokio::select! {
            result = &mut serve => result,
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                server.shutdown().await?;
                (&mut serve).await
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = listener_task.await {
            tracing::warn!(error = %e, "decision listener panicked");
        }
        tracing::info!(abandoned = self.table.len(), "daemon stopped");
        served
    }
}
