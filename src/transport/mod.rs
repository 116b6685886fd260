pub mod backoff;
pub mod format;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::decision::{ActionPayload, Outcome};
use crate::error::Result;
use crate::pending::PendingTable;

pub use backoff::ReconnectPolicy;
pub use telegram::TelegramTransport;

/// Bridge to the messaging service that reaches the human reviewer.
///
/// Implementations hold no authoritative request state: every decision they
/// receive goes through [`PendingTable::resolve`].
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Dispatch the approval prompt for `id`. An error here means no decision
    /// can ever arrive for this request.
    async fn send_prompt(&self, id: &str, payload: &ActionPayload) -> Result<()>;

    /// Receive decisions and resolve them into `table` until `shutdown`
    /// flips to `true`. Connection loss is retried, never returned.
    async fn listen(&self, table: Arc<PendingTable>, shutdown: watch::Receiver<bool>);

    /// Annotate the prompt of a finished request. Failures are swallowed.
    async fn finalize(&self, _id: &str, _outcome: &Outcome) {}

    /// Drop any per-request bookkeeping for a request abandoned without an
    /// outcome.
    fn forget(&self, _id: &str) {}
}
