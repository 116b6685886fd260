use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::decision::{ActionPayload, HumanDecision, Outcome, RequestState};

/// Correlation id shared by the socket protocol and the channel transport.
pub type RequestId = String;

struct Slot {
    payload: ActionPayload,
    created_at: Instant,
    seq: u64,
    state: RequestState,
    waker: Option<oneshot::Sender<Outcome>>,
    receiver: Option<oneshot::Receiver<Outcome>>,
}

/// Concurrency-safe table of requests awaiting a human decision.
///
/// Every state change goes through the per-key lock of the `DashMap` shard,
/// so a decision and a timeout racing for the same id are ordered: the first
/// one to take the lock moves the entry out of `Pending`, the other becomes a
/// no-op.
pub struct PendingTable {
    entries: DashMap<RequestId, Slot>,
    next_seq: AtomicU64,
    late_decisions: AtomicU64,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            late_decisions: AtomicU64::new(0),
        }
    }

    /// Insert a fresh `Pending` entry and return its id.
    pub fn register(&self, payload: ActionPayload) -> RequestId {
        loop {
            let id = Uuid::new_v4().to_string();
            match self.entries.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let (tx, rx) = oneshot::channel();
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        request_id = %id,
                        tool = %payload.tool_name,
                        "registered request"
                    );
                    vacant.insert(Slot {
                        payload,
                        created_at: Instant::now(),
                        seq,
                        state: RequestState::Pending,
                        waker: Some(tx),
                        receiver: Some(rx),
                    });
                    return id;
                }
            }
        }
    }

    /// Deliver a human decision. Returns `false` when the id is unknown or
    /// already terminal; such late decisions are logged and dropped.
    pub fn resolve(&self, id: &str, decision: HumanDecision) -> bool {
        let outcome = Outcome::from(decision);
        let label = outcome.to_string();
        match self.transition(id, outcome) {
            Ok(()) => true,
            Err(state) => {
                self.late_decisions.fetch_add(1, Ordering::Relaxed);
                match state {
                    Some(state) => tracing::info!(
                        request_id = %id,
                        %state,
                        decision = %label,
                        "late decision for resolved request ignored"
                    ),
                    None => tracing::info!(
                        request_id = %id,
                        decision = %label,
                        "late decision for unknown request ignored"
                    ),
                }
                false
            }
        }
    }

    /// Block until the entry leaves `Pending` or `deadline` passes, then
    /// remove it. On expiry the entry becomes `TimedOut` unless a decision
    /// took the lock first, in which case that decision is returned.
    pub async fn await_resolution(&self, id: &str, deadline: Instant) -> Outcome {
        let receiver = self
            .entries
            .get_mut(id)
            .and_then(|mut slot| slot.receiver.take());
        let Some(mut rx) = receiver else {
            return Outcome::errored(format!("request {id} is unknown or already awaited"));
        };

        let waited = tokio::time::timeout_at(deadline, &mut rx).await;
        let outcome = match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Outcome::errored("request waker dropped"),
            Err(_) => {
                if self.transition(id, Outcome::TimedOut).is_ok() {
                    tracing::info!(request_id = %id, "request timed out");
                }
                rx.try_recv()
                    .unwrap_or_else(|_| Outcome::errored("request waker dropped"))
            }
        };

        self.entries.remove(id);
        outcome
    }

    /// Mark a still-pending entry `Errored`, remove it, and return whatever
    /// terminal outcome it ended with.
    pub fn fail(&self, id: &str, reason: &str) -> Outcome {
        let _ = self.transition(id, Outcome::errored(reason));
        match self.entries.remove(id).and_then(|(_, mut slot)| slot.receiver.take()) {
            Some(mut rx) => rx.try_recv().unwrap_or_else(|_| Outcome::errored(reason)),
            None => Outcome::errored(reason),
        }
    }

    /// Move a `Pending` entry to the state of `outcome` and wake its waiter.
    /// On refusal returns the state the entry already had, or `None` if the
    /// id is unknown.
    fn transition(
        &self,
        id: &str,
        outcome: Outcome,
    ) -> std::result::Result<(), Option<RequestState>> {
        let Some(mut slot) = self.entries.get_mut(id) else {
            return Err(None);
        };
        if slot.state.is_terminal() {
            return Err(Some(slot.state));
        }

        slot.state = outcome.state().unwrap_or(RequestState::Errored);
        if let Some(tx) = slot.waker.take() {
            // The waiter may be gone if its client disconnected; the entry is
            // still removed by whoever awaits or fails it.
            let _ = tx.send(outcome);
        }
        Ok(())
    }

    /// Drop an entry without resolving it. No-op if already removed.
    pub fn discard(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            tracing::debug!(request_id = %id, "request discarded");
        }
    }

    /// Current state of an entry still held in the table.
    pub fn state(&self, id: &str) -> Option<RequestState> {
        self.entries.get(id).map(|slot| slot.state)
    }

    pub fn created_at(&self, id: &str) -> Option<Instant> {
        self.entries.get(id).map(|slot| slot.created_at)
    }

    pub fn payload(&self, id: &str) -> Option<ActionPayload> {
        self.entries.get(id).map(|slot| slot.payload.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// The earliest-registered request still awaiting a decision.
    pub fn oldest_pending(&self) -> Option<(RequestId, ActionPayload)> {
        self.entries
            .iter()
            .filter(|slot| slot.state == RequestState::Pending)
            .min_by_key(|slot| slot.seq)
            .map(|slot| (slot.key().clone(), slot.payload.clone()))
    }

    /// Number of requests still awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.state == RequestState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decisions dropped because their request had already terminated.
    pub fn late_decisions(&self) -> u64 {
        self.late_decisions.load(Ordering::Relaxed)
    }
}
