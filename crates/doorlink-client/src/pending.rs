//! Pending-request bookkeeping.
//!
//! Entries are created when a command expecting a reply is sent and removed
//! when a matching `query_result` arrives or the session disconnects. Nothing
//! here times out on its own; callers read [`PendingRequests::oldest_age`] or
//! wrap a [`PendingReply`] in `tokio::time::timeout` to build their own policy.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use doorlink_protocol::{QueryResult, SeqId};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ClientError, ClientResult};

/// One-shot callback invoked with the reply to a single request.
pub type ReplyCallback = Box<dyn FnOnce(&QueryResult) + Send>;

/// How a resolved entry is completed.
pub(crate) enum Completion {
    /// Tracked only; no per-call consumer.
    None,
    Callback(ReplyCallback),
    Reply(oneshot::Sender<QueryResult>),
}

impl Completion {
    /// Delivers `result` to the per-call consumer, if any.
    pub(crate) fn complete(self, result: &QueryResult) {
        match self {
            Self::None => {}
            Self::Callback(callback) => callback(result),
            Self::Reply(tx) => {
                // The receiver may have been dropped by a caller that gave up.
                let _ = tx.send(result.clone());
            }
        }
    }
}

pub(crate) struct PendingEntry {
    seq_id: SeqId,
    target: String,
    issued_at: Instant,
    pub(crate) completion: Completion,
}

/// Read-only view of an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub seq_id: SeqId,
    /// Target whose `query_result` is expected.
    pub target: String,
    pub age: Duration,
}

/// Outstanding requests in send order.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Vec<PendingEntry>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, seq_id: SeqId, target: impl Into<String>, completion: Completion) {
        self.entries.push(PendingEntry {
            seq_id,
            target: target.into(),
            issued_at: Instant::now(),
            completion,
        });
    }

    /// Removes the entry for `seq_id`, e.g. when the send itself failed.
    pub(crate) fn remove(&mut self, seq_id: &SeqId) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|e| &e.seq_id == seq_id)?;
        Some(self.entries.remove(index))
    }

    /// Takes the entry a reply answers.
    ///
    /// A reply echoing a known `seq_id` resolves exactly that entry. Otherwise
    /// the oldest entry for the reply's target is taken, since devices may omit
    /// or mangle the echoed id. Two in-flight requests for the same target can
    /// therefore complete out of order when the device drops ids.
    pub(crate) fn resolve(&mut self, result: &QueryResult) -> Option<PendingEntry> {
        if let Some(seq_id) = &result.seq_id {
            if let Some(entry) = self.remove(seq_id) {
                return Some(entry);
            }
        }
        let index = self.entries.iter().position(|e| e.target == result.target)?;
        Some(self.entries.remove(index))
    }

    /// Drops every entry. Callbacks never fire; reply futures resolve to
    /// [`ClientError::Abandoned`].
    pub(crate) fn clear(&mut self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn oldest_age(&self) -> Option<Duration> {
        self.entries.first().map(|e| e.issued_at.elapsed())
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingInfo> {
        self.entries
            .iter()
            .map(|e| PendingInfo {
                seq_id: e.seq_id.clone(),
                target: e.target.clone(),
                age: e.issued_at.elapsed(),
            })
            .collect()
    }
}

/// Future resolving with the reply to one request.
///
/// Resolves to [`ClientError::Abandoned`] if the session disconnects first.
#[derive(Debug)]
pub struct PendingReply {
    seq_id: SeqId,
    rx: oneshot::Receiver<QueryResult>,
}

impl PendingReply {
    pub(crate) fn new(seq_id: SeqId, rx: oneshot::Receiver<QueryResult>) -> Self {
        Self { seq_id, rx }
    }

    /// Correlation handle of the request.
    pub fn seq_id(&self) -> &SeqId {
        &self.seq_id
    }
}

impl Future for PendingReply {
    type Output = ClientResult<QueryResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| ClientError::Abandoned))
    }
}
