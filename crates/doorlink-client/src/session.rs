//! WebSocket session with the lock.
//!
//! A [`DeviceSession`] owns one socket at a time and is the single
//! demultiplexing point for everything arriving on it: binary payloads go
//! through the frame codec and out as audio or video events, text payloads
//! are parsed as protocol messages and dispatched by type. Replies are
//! matched against pending requests, normalized, and dispatched again under
//! `<target>_query_result`.
//!
//! Nothing here reconnects on its own. On an unexpected close the session
//! moves to [`ConnectionState::Disconnected`] and emits a status event; the
//! retry policy belongs to the caller (see [`crate::reconnect`]).

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use doorlink_core::{HistoryKind, HistoryStore, normalize_query_result};
use doorlink_protocol::{
    BinaryFrame, DeviceCommand, InboundMessage, OutboundCommand, Query, QueryResult, SeqId,
    UserCategory, UserCommand, UserMgmtCommand, decode_frame,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::audio::pcm_bytes;
use crate::error::{ClientError, ClientResult};
use crate::listeners::{
    Event, EventKind, ListenerRegistry, PushEvent, StatusUpdate, Subscription, panic_message,
};
use crate::pending::{Completion, PendingInfo, PendingReply, PendingRequests};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket-bound state, replaced wholesale on every connect.
struct Link {
    state: ConnectionState,
    /// Bumped whenever the current socket is torn down, so tasks of a previous
    /// socket can tell they are stale.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    pending: PendingRequests,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Drops the socket and abandons pending requests. Returns how many were
    /// abandoned.
    fn teardown(&mut self) -> usize {
        self.generation += 1;
        // The writer task closes the socket once its channel drains.
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ConnectionState::Disconnected;
        self.pending.clear()
    }
}

struct Inner {
    link: Mutex<Link>,
    listeners: Arc<ListenerRegistry>,
    history: Option<Arc<dyn HistoryStore>>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Builder for [`DeviceSession`].
#[derive(Default)]
pub struct SessionBuilder {
    history: Option<Arc<dyn HistoryStore>>,
    connect_timeout: Option<Duration>,
}

impl SessionBuilder {
    /// Saves visitor-intent and package-alert pushes to `store` before they
    /// are dispatched.
    pub fn history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> DeviceSession {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        DeviceSession {
            inner: Arc::new(Inner {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    pending: PendingRequests::new(),
                    reader: None,
                }),
                listeners: Arc::new(ListenerRegistry::new()),
                history: self.history,
                state_tx,
            }),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

/// Session with one lock.
///
/// Cloning yields another handle to the same session. The application is
/// expected to construct one session per physical device and pass handles
/// to whatever needs it.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<Inner>,
    connect_timeout: Duration,
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl DeviceSession {
    /// Creates a disconnected session with no history store.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watches connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Opens the socket.
    ///
    /// Any existing connection is torn down first, abandoning its pending
    /// requests. The session is `Connecting` while the handshake runs and
    /// `Connected` once it completes.
    pub async fn connect(&self, url: &Url) -> ClientResult<()> {
        let (generation, abandoned) = {
            let mut link = self.inner.lock();
            let abandoned = link.teardown();
            link.state = ConnectionState::Connecting;
            (link.generation, abandoned)
        };
        if abandoned > 0 {
            debug!(abandoned, "pending requests abandoned by reconnect");
        }
        self.inner.publish(ConnectionState::Connecting);
        info!(url = %redact(url), "connecting to device");

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await;
        let stream = match handshake {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.inner.connect_failed(generation);
                return Err(ClientError::Connection(format!(
                    "failed to connect to {}: {}",
                    redact(url),
                    e
                )));
            }
            Err(_) => {
                self.inner.connect_failed(generation);
                return Err(ClientError::Timeout(format!(
                    "connection timed out after {}s",
                    self.connect_timeout.as_secs()
                )));
            }
        };

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut link = self.inner.lock();
            if link.generation != generation {
                // disconnect() or another connect() ran during the handshake
                return Err(ClientError::Connection("connection attempt cancelled".into()));
            }
            link.outbound = Some(tx);
            link.state = ConnectionState::Connected;
            tokio::spawn(write_loop(sink, rx));
            link.reader = Some(tokio::spawn(read_loop(
                Arc::downgrade(&self.inner),
                stream,
                generation,
            )));
        }

        info!("connected to device");
        self.inner.publish(ConnectionState::Connected);
        Ok(())
    }

    /// Closes the socket and abandons every pending request.
    ///
    /// Abandoned callbacks never fire; outstanding [`PendingReply`] futures
    /// resolve to [`ClientError::Abandoned`]. Messages still queued from the
    /// closed socket are dropped. A listener call already running on the
    /// reader task when this is called from another task finishes normally.
    /// Does nothing when already disconnected.
    pub fn disconnect(&self) {
        let abandoned = {
            let mut link = self.inner.lock();
            if link.state == ConnectionState::Disconnected {
                return;
            }
            link.teardown()
        };
        info!(abandoned, "disconnected from device");
        self.inner.publish(ConnectionState::Disconnected);
    }

    /// Registers a listener. Listeners for one kind run in registration order.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(kind.clone(), Arc::new(listener));
        Subscription::new(&self.inner.listeners, kind, id)
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.inner.listeners.count(kind)
    }

    /// Sends a command and returns its correlation handle.
    ///
    /// A `seq_id` is generated when the command has none. Returns `None`,
    /// without touching the wire, when the session is not connected; the
    /// command is not queued.
    pub fn send(&self, command: impl Into<OutboundCommand>) -> Option<SeqId> {
        self.inner.send_tracked(command.into(), Completion::None)
    }

    /// Sends `{"type":"query","target":...}` with `params` at the top level.
    pub fn query(&self, target: impl Into<String>, params: Map<String, Value>) -> Option<SeqId> {
        self.send(Query::new(target).params(params))
    }

    /// Like [`query`](Self::query), invoking `callback` once with the reply.
    ///
    /// The callback is dropped without running if the session disconnects
    /// first.
    pub fn query_with<F>(
        &self,
        target: impl Into<String>,
        params: Map<String, Value>,
        callback: F,
    ) -> Option<SeqId>
    where
        F: FnOnce(&QueryResult) + Send + 'static,
    {
        let query = Query::new(target).params(params);
        self.inner
            .send_tracked(query.into(), Completion::Callback(Box::new(callback)))
    }

    /// Like [`query`](Self::query), returning a future for the reply.
    ///
    /// No timeout is applied; wrap the future in `tokio::time::timeout` when
    /// one is needed.
    pub fn query_reply(
        &self,
        target: impl Into<String>,
        params: Map<String, Value>,
    ) -> Option<PendingReply> {
        self.request(Query::new(target).params(params))
    }

    /// Sends any command and returns a future for its `query_result`.
    pub fn request(&self, command: impl Into<OutboundCommand>) -> Option<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let seq_id = self.inner.send_tracked(command.into(), Completion::Reply(tx))?;
        Some(PendingReply::new(seq_id, rx))
    }

    /// Sends a user-management command.
    ///
    /// `payload` is carried only when given, except for `password`/`set`,
    /// which always carries one.
    pub fn send_user_mgmt(
        &self,
        category: UserCategory,
        command: UserCommand,
        user_id: u32,
        payload: Option<String>,
    ) -> Option<SeqId> {
        self.send(UserMgmtCommand::new(category, command, user_id, payload))
    }

    /// Sends `{"type":"command","command":name}` with `params` at the top
    /// level.
    pub fn send_command(&self, name: impl Into<String>, params: Map<String, Value>) -> Option<SeqId> {
        let mut command = DeviceCommand::new(name);
        command.params = params;
        self.send(command)
    }

    /// Frames 16-bit PCM samples as audio and sends them immediately.
    pub fn send_audio(&self, samples: &[i16]) -> bool {
        self.send_frame(&BinaryFrame::audio(pcm_bytes(samples)))
    }

    /// Encodes and sends a binary frame. Returns `false` when disconnected.
    pub fn send_frame(&self, frame: &BinaryFrame) -> bool {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "refusing to send frame");
                return false;
            }
        };
        self.inner.send_raw(Message::Binary(bytes))
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Age of the oldest request awaiting a reply.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.inner.lock().pending.oldest_age()
    }

    /// Snapshot of outstanding requests, oldest first.
    pub fn pending(&self) -> Vec<PendingInfo> {
        self.inner.lock().pending.snapshot()
    }

    /// Marks the session connected over an in-memory channel.
    #[cfg(test)]
    pub(crate) fn attach(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut link = self.inner.lock();
            link.teardown();
            link.outbound = Some(tx);
            link.state = ConnectionState::Connected;
        }
        self.inner.publish(ConnectionState::Connected);
        rx
    }

    /// Feeds a message as if read from the current socket.
    #[cfg(test)]
    pub(crate) fn inject(&self, message: Message) {
        let generation = self.generation();
        self.inner.handle_message(message, generation);
    }

    /// Feeds a message as if read by the reader of `generation`.
    #[cfg(test)]
    pub(crate) fn inject_from(&self, generation: u64, message: Message) {
        self.inner.handle_message(message, generation);
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.inner.lock().generation
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Dispatches unless the socket that produced `event` has been replaced
    /// or closed since.
    fn dispatch_from(&self, generation: u64, event: &Event) {
        if !self.is_current(generation) {
            trace!(kind = %event.kind(), "dropping event from a closed socket");
            return;
        }
        self.listeners.dispatch(event);
    }

    /// Records the new state and emits a status event. Must not be called
    /// with the link locked.
    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        self.listeners
            .dispatch(&Event::Status(StatusUpdate::Connection(state)));
    }

    fn connect_failed(&self, generation: u64) {
        {
            let mut link = self.lock();
            if link.generation != generation {
                return;
            }
            link.state = ConnectionState::Disconnected;
        }
        self.publish(ConnectionState::Disconnected);
    }

    fn send_tracked(&self, mut command: OutboundCommand, completion: Completion) -> Option<SeqId> {
        let seq_id = command.ensure_seq_id();
        let text = match command.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize command");
                return None;
            }
        };

        let mut link = self.lock();
        let Link {
            state,
            outbound,
            pending,
            ..
        } = &mut *link;
        let outbound = match (state, outbound) {
            (ConnectionState::Connected, Some(outbound)) => outbound,
            (state, _) => {
                debug!(%state, query_target = command.reply_target(), "send while not connected");
                return None;
            }
        };

        pending.insert(seq_id.clone(), command.reply_target(), completion);
        if outbound.send(Message::Text(text)).is_err() {
            pending.remove(&seq_id);
            warn!(seq_id = %seq_id, "socket writer is gone");
            return None;
        }

        debug!(
            seq_id = %seq_id,
            query_target = command.reply_target(),
            pending = pending.len(),
            "command sent"
        );
        Some(seq_id)
    }

    fn send_raw(&self, message: Message) -> bool {
        let link = self.lock();
        match (&link.state, &link.outbound) {
            (ConnectionState::Connected, Some(outbound)) => outbound.send(message).is_ok(),
            _ => {
                trace!("frame dropped while not connected");
                false
            }
        }
    }

    fn handle_message(&self, message: Message, generation: u64) {
        match message {
            Message::Text(text) => self.handle_text(&text, generation),
            Message::Binary(bytes) => self.handle_binary(&bytes, generation),
            // ping/pong are answered by tungstenite; close ends the read loop
            _ => {}
        }
    }

    fn handle_text(&self, text: &str, generation: u64) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed message");
                return;
            }
        };
        trace!(kind = message.kind(), "message received");

        match message {
            InboundMessage::QueryResult(result) => self.handle_query_result(result, generation),
            InboundMessage::VisitorIntent(data) => {
                self.handle_push(HistoryKind::VisitorIntent, data, generation)
            }
            InboundMessage::PackageAlert(data) => {
                self.handle_push(HistoryKind::PackageAlert, data, generation)
            }
            InboundMessage::Status(body) => {
                self.dispatch_from(generation, &Event::Status(StatusUpdate::Device(body)));
            }
            InboundMessage::Log(body) => {
                self.dispatch_from(generation, &Event::Log(body));
            }
            InboundMessage::Stats(body) => {
                self.dispatch_from(generation, &Event::Stats(body));
            }
            InboundMessage::Frame(body) => {
                self.dispatch_from(generation, &Event::Frame(body));
            }
            InboundMessage::Other { kind, body } => {
                self.dispatch_from(generation, &Event::Other { kind, body });
            }
        }
    }

    fn handle_binary(&self, bytes: &[u8], generation: u64) {
        let Some(frame) = decode_frame(bytes) else {
            warn!(len = bytes.len(), "dropping malformed binary frame");
            return;
        };
        trace!(
            channel = frame.channel_tag(),
            len = frame.payload_length(),
            "frame received"
        );
        let event = if frame.is_audio() {
            Event::Audio(frame)
        } else {
            Event::Video(frame)
        };
        self.dispatch_from(generation, &event);
    }

    fn handle_query_result(&self, result: QueryResult, generation: u64) {
        let entry = {
            let mut link = self.lock();
            if link.generation != generation {
                trace!(query_target = %result.target, "dropping reply from a closed socket");
                return;
            }
            link.pending.resolve(&result)
        };
        if entry.is_none() {
            debug!(query_target = %result.target, "reply matched no pending request");
        }

        let normalized = normalize_query_result(&result);
        if !normalized.is_success() {
            debug!(query_target = %result.target, error = result.error_message(), "query failed");
        }

        self.dispatch_from(generation, &Event::QueryResult(result.clone()));
        self.dispatch_from(generation, &Event::TargetResult(normalized));

        if let Some(entry) = entry {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| entry.completion.complete(&result))) {
                error!(
                    query_target = %result.target,
                    panic = panic_message(&panic),
                    "reply callback panicked"
                );
            }
        }
    }

    fn handle_push(&self, kind: HistoryKind, data: Value, generation: u64) {
        if !self.is_current(generation) {
            trace!(kind = %kind, "dropping push from a closed socket");
            return;
        }
        let record = self.history.as_ref().and_then(|store| {
            store
                .save(kind, data.clone())
                .inspect_err(|e| warn!(kind = %kind, error = %e, "failed to save push"))
                .ok()
        });
        let push = PushEvent { data, record };
        let event = match kind {
            HistoryKind::VisitorIntent => Event::VisitorIntent(push),
            HistoryKind::PackageAlert => Event::PackageAlert(push),
        };
        self.dispatch_from(generation, &event);
    }

    /// The socket closed without `disconnect()` being called.
    fn handle_closed(&self, generation: u64) {
        let abandoned = {
            let mut link = self.lock();
            if link.generation != generation {
                return;
            }
            // this task is finishing; nothing to abort
            link.reader = None;
            link.teardown()
        };
        warn!(abandoned, "connection to device lost");
        self.publish(ConnectionState::Disconnected);
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "websocket write failed");
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "websocket close failed");
    }
}

async fn read_loop(inner: Weak<Inner>, mut stream: SplitStream<WsStream>, generation: u64) {
    while let Some(frame) = stream.next().await {
        let Some(session) = inner.upgrade() else {
            return;
        };
        if !session.is_current(generation) {
            return;
        }
        match frame {
            Ok(Message::Close(frame)) => {
                debug!(?frame, "device closed the connection");
                break;
            }
            Ok(message) => session.handle_message(message, generation),
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    if let Some(session) = inner.upgrade() {
        session.handle_closed(generation);
    }
}

/// The URL without its query string, which may carry the auth token.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
