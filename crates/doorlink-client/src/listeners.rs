//! Event vocabulary and listener registry.
//!
//! Every message the session demultiplexes is turned into an [`Event`] and
//! handed to the listeners registered for its [`EventKind`]. Listeners run
//! synchronously, in registration order, on the task that received the
//! message. A panicking listener is logged and skipped; the remaining
//! listeners for the same event still run.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use doorlink_core::{HistoryRecord, TargetResult};
use doorlink_protocol::{BinaryFrame, QueryResult};
use serde_json::Value;
use tracing::{error, trace};

use crate::session::ConnectionState;

/// Name under which listeners register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection transitions and device `status` messages.
    Status,
    Log,
    Stats,
    /// Frame notifications (JSON), not the media itself.
    Frame,
    /// Every `query_result`, as received.
    QueryResult,
    /// Normalized results for one target, e.g. `password_query_result`.
    TargetResult(String),
    VisitorIntent,
    PackageAlert,
    /// Decoded audio frames.
    Audio,
    /// Decoded video frames.
    Video,
    /// Any other message `type`.
    Other(String),
}

impl EventKind {
    /// Kind for normalized results of `target`.
    pub fn target_result(target: impl Into<String>) -> Self {
        Self::TargetResult(target.into())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("status"),
            Self::Log => f.write_str("log"),
            Self::Stats => f.write_str("stats"),
            Self::Frame => f.write_str("frame"),
            Self::QueryResult => f.write_str("query_result"),
            Self::TargetResult(target) => write!(f, "{target}_query_result"),
            Self::VisitorIntent => f.write_str("visitor_intent"),
            Self::PackageAlert => f.write_str("package_alert"),
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "status" => Self::Status,
            "log" => Self::Log,
            "stats" => Self::Stats,
            "frame" => Self::Frame,
            "query_result" => Self::QueryResult,
            "visitor_intent" => Self::VisitorIntent,
            "package_alert" => Self::PackageAlert,
            "audio" => Self::Audio,
            "video" => Self::Video,
            other => match other.strip_suffix("_query_result") {
                Some(target) if !target.is_empty() => Self::TargetResult(target.to_string()),
                _ => Self::Other(other.to_string()),
            },
        })
    }
}

/// Payload of a [`EventKind::Status`] event.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// The session changed connection state.
    Connection(ConnectionState),
    /// The device sent a `status` message.
    Device(Value),
}

/// A visitor-intent or package-alert push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Message body as sent by the device.
    pub data: Value,
    /// The stored copy, when a history store is attached and saving worked.
    pub record: Option<HistoryRecord>,
}

/// An event dispatched to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(StatusUpdate),
    Log(Value),
    Stats(Value),
    Frame(Value),
    QueryResult(QueryResult),
    TargetResult(TargetResult),
    VisitorIntent(PushEvent),
    PackageAlert(PushEvent),
    Audio(BinaryFrame),
    Video(BinaryFrame),
    Other { kind: String, body: Value },
}

impl Event {
    /// The kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status(_) => EventKind::Status,
            Self::Log(_) => EventKind::Log,
            Self::Stats(_) => EventKind::Stats,
            Self::Frame(_) => EventKind::Frame,
            Self::QueryResult(_) => EventKind::QueryResult,
            Self::TargetResult(result) => EventKind::TargetResult(result.target.clone()),
            Self::VisitorIntent(_) => EventKind::VisitorIntent,
            Self::PackageAlert(_) => EventKind::PackageAlert,
            Self::Audio(_) => EventKind::Audio,
            Self::Video(_) => EventKind::Video,
            Self::Other { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// A registered callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Slots {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Ordered listener lists keyed by [`EventKind`].
#[derive(Default)]
pub struct ListenerRegistry {
    slots: Mutex<Slots>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.lock();
        let counts: HashMap<String, usize> = slots
            .by_kind
            .iter()
            .map(|(kind, list)| (kind.to_string(), list.len()))
            .collect();
        f.debug_struct("ListenerRegistry").field("listeners", &counts).finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a listener and returns its id.
    pub fn add(&self, kind: EventKind, listener: Listener) -> u64 {
        let mut slots = self.lock();
        slots.next_id += 1;
        let id = slots.next_id;
        slots.by_kind.entry(kind).or_default().push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn remove(&self, kind: &EventKind, id: u64) -> bool {
        let mut slots = self.lock();
        let Some(list) = slots.by_kind.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            slots.by_kind.remove(kind);
        }
        removed
    }

    /// Number of listeners registered for `kind`.
    pub fn count(&self, kind: &EventKind) -> usize {
        self.lock().by_kind.get(kind).map_or(0, Vec::len)
    }

    /// Invokes every listener for the event's kind and returns how many ran
    /// to completion.
    ///
    /// The registry lock is released before listeners run, so listeners may
    /// register, unsubscribe or send.
    pub fn dispatch(&self, event: &Event) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = match self.lock().by_kind.get(&kind) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => {
                trace!(event = %kind, "no listeners");
                return 0;
            }
        };

        let mut completed = 0;
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    error!(event = %kind, panic = panic_message(&panic), "listener panicked");
                }
            }
        }
        completed
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`DeviceSession::on`](crate::DeviceSession::on).
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<ListenerRegistry>, kind: EventKind, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            kind,
            id,
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Removes the listener. Returns `false` if it was already removed or the
    /// session is gone.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.kind, self.id))
    }
}
