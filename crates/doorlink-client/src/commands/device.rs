//! Commands that talk to the lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use doorlink_core::{HistoryStore, Outcome, TargetResult, normalize_query_result};
use doorlink_protocol::{
    QueryResult, UserCategory, UserCommand, UserMgmtCommand, targets,
};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use url::Url;

use crate::audio::SAMPLE_RATE;
use crate::config::{AudioSettings, ClientConfig};
use crate::error::{ClientError, ClientResult};
use crate::listeners::{Event, EventKind, StatusUpdate};
use crate::pending::PendingReply;
use crate::session::{ConnectionState, DeviceSession};

/// Events printed by `watch` when no filter is given. Media frames are left
/// out since they arrive many times per second.
const DEFAULT_WATCH_EVENTS: &[&str] = &[
    "status",
    "log",
    "stats",
    "query_result",
    "visitor_intent",
    "package_alert",
];

/// Connects a session for a one-shot command.
pub async fn open(config: &ClientConfig, url: &Url) -> ClientResult<DeviceSession> {
    let session = DeviceSession::builder()
        .connect_timeout(config.connect_timeout())
        .build();
    session.connect(url).await?;
    Ok(session)
}

/// Queries `target` and prints the normalized result.
pub async fn query(
    session: &DeviceSession,
    target: &str,
    limit: Option<u32>,
    timeout: Duration,
    compact: bool,
) -> ClientResult<()> {
    let mut params = Map::new();
    if let Some(limit) = limit {
        params.insert("limit".to_string(), limit.into());
    }
    let reply = session
        .query_reply(target, params)
        .ok_or(ClientError::NotConnected)?;
    let result = await_reply(reply, timeout).await?;

    let normalized = normalize_query_result(&result);
    if let Outcome::Failure(message) = &normalized.outcome {
        return Err(ClientError::Device(message.clone()));
    }
    print_json(&target_result_json(&normalized), compact);
    Ok(())
}

/// Prints the unlock password, `123456` when none is configured.
pub async fn password(session: &DeviceSession, timeout: Duration) -> ClientResult<()> {
    let reply = session
        .query_reply(targets::PASSWORD, Map::new())
        .ok_or(ClientError::NotConnected)?;
    let result = await_reply(reply, timeout).await?;

    let normalized = normalize_query_result(&result);
    match (&normalized.outcome, normalized.password()) {
        (_, Some(password)) => {
            println!("{password}");
            Ok(())
        }
        (Outcome::Failure(message), _) => Err(ClientError::Device(message.clone())),
        (Outcome::Success { .. }, None) => Err(ClientError::Protocol(
            "password reply carried no password data".into(),
        )),
    }
}

/// Sends a user-management command and prints the device's reply.
pub async fn user(
    session: &DeviceSession,
    category: UserCategory,
    command: UserCommand,
    user_id: u32,
    payload: Option<String>,
    timeout: Duration,
    compact: bool,
) -> ClientResult<()> {
    let reply = session
        .request(UserMgmtCommand::new(category, command, user_id, payload))
        .ok_or(ClientError::NotConnected)?;
    info!(
        seq_id = %reply.seq_id(),
        category = category.as_str(),
        command = command.as_str(),
        "user command sent"
    );

    let result = await_reply(reply, timeout).await?;
    if !result.is_success() {
        return Err(ClientError::Device(result.error_message().to_string()));
    }
    print_json(&serde_json::to_value(&result).unwrap_or(Value::Null), compact);
    Ok(())
}

/// Streams float samples to the lock speaker, one frame per chunk, paced at
/// the configured sample rate. Returns the number of frames sent.
pub async fn speak(
    session: &DeviceSession,
    audio: &AudioSettings,
    samples: &[f32],
) -> ClientResult<usize> {
    if audio.sample_rate != SAMPLE_RATE {
        warn!(
            sample_rate = audio.sample_rate,
            device_rate = SAMPLE_RATE,
            "input rate differs from the lock's playback rate"
        );
    }

    let mut chunker = audio.chunker();
    let mut chunks = chunker.push(samples);
    chunks.extend(chunker.flush());

    let mut ticker = tokio::time::interval(audio.chunk_duration());
    for chunk in &chunks {
        ticker.tick().await;
        if !session.send_audio(chunk) {
            return Err(ClientError::NotConnected);
        }
    }
    info!(frames = chunks.len(), samples = samples.len(), "audio sent");
    Ok(chunks.len())
}

/// Streams events until Ctrl-C, reconnecting with backoff on loss.
pub async fn watch(
    config: &ClientConfig,
    url: &Url,
    filters: &[String],
    history: Arc<dyn HistoryStore>,
    compact: bool,
) -> ClientResult<()> {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    watch_until(config, url, filters, history, compact, ctrl_c).await
}

/// [`watch`] with a caller-supplied shutdown signal, honored at every stage
/// including the handshake.
pub async fn watch_until(
    config: &ClientConfig,
    url: &Url,
    filters: &[String],
    history: Arc<dyn HistoryStore>,
    compact: bool,
    shutdown: impl Future<Output = ()>,
) -> ClientResult<()> {
    let session = DeviceSession::builder()
        .history(history)
        .connect_timeout(config.connect_timeout())
        .build();

    let names: Vec<&str> = if filters.is_empty() {
        DEFAULT_WATCH_EVENTS.to_vec()
    } else {
        filters.iter().map(String::as_str).collect()
    };
    for name in names {
        let kind: EventKind = match name.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };
        session.on(kind, move |event| print_json(&event_json(event), compact));
    }

    let policy = config.reconnect_policy();
    let mut state = session.subscribe_state();
    let mut failures: u32 = 0;
    tokio::pin!(shutdown);

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown => {
                session.disconnect();
                return Ok(());
            }
            result = session.connect(url) => result,
        };
        match connected {
            Ok(()) => {
                failures = 0;
                tokio::select! {
                    _ = &mut shutdown => {
                        session.disconnect();
                        return Ok(());
                    }
                    _ = state.wait_for(|s| *s == ConnectionState::Disconnected) => {}
                }
                // a dropped link counts as one failure for pacing
                failures = 1;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(error = %e, attempt = failures, "connection attempt failed");
                if !policy.should_retry(failures) {
                    return Err(e);
                }
            }
        }

        let delay = policy.backoff_delay(failures);
        info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn await_reply(reply: PendingReply, timeout: Duration) -> ClientResult<QueryResult> {
    let seq_id = reply.seq_id().clone();
    tokio::time::timeout(timeout, reply).await.map_err(|_| {
        ClientError::Timeout(format!(
            "no reply to {} after {}s",
            seq_id,
            timeout.as_secs()
        ))
    })?
}

/// JSON rendering of a normalized result.
pub fn target_result_json(result: &TargetResult) -> Value {
    match &result.outcome {
        Outcome::Success { data, total } => json!({
            "target": result.target,
            "status": "success",
            "data": data,
            "total": total,
        }),
        Outcome::Failure(message) => json!({
            "target": result.target,
            "status": "error",
            "error": message,
        }),
    }
}

/// JSON rendering of an event, one object per line in `watch`.
pub fn event_json(event: &Event) -> Value {
    let name = event.kind().to_string();
    match event {
        Event::Status(StatusUpdate::Connection(state)) => {
            json!({"event": name, "connection": state.as_str()})
        }
        Event::Status(StatusUpdate::Device(body))
        | Event::Log(body)
        | Event::Stats(body)
        | Event::Frame(body)
        | Event::Other { body, .. } => json!({"event": name, "data": body}),
        Event::QueryResult(result) => json!({"event": name, "data": result}),
        Event::TargetResult(result) => {
            let mut value = target_result_json(result);
            if let Some(object) = value.as_object_mut() {
                object.insert("event".to_string(), Value::String(name));
            }
            value
        }
        Event::VisitorIntent(push) | Event::PackageAlert(push) => json!({
            "event": name,
            "id": push.record.as_ref().map(|r| r.id),
            "data": push.data,
        }),
        Event::Audio(frame) | Event::Video(frame) => json!({
            "event": name,
            "channel": frame.channel_tag(),
            "bytes": frame.payload_length(),
        }),
    }
}

pub(crate) fn print_json(value: &Value, compact: bool) {
    if compact {
        println!("{value}");
    } else {
        println!("{value:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorlink_core::MemoryStore;
    use doorlink_protocol::{BinaryFrame, decode_frame};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn password_result_json() {
        let result = normalize_query_result(&QueryResult::success("password", json!({})));
        assert_eq!(
            target_result_json(&result),
            json!({"target": "password", "status": "success", "data": {"password": "123456"}, "total": null})
        );
    }

    #[test]
    fn failure_result_json() {
        let result = normalize_query_result(&QueryResult::failure("events", "busy"));
        assert_eq!(target_result_json(&result)["error"], "busy");
    }

    #[test]
    fn event_json_shapes() {
        let status = Event::Status(StatusUpdate::Connection(ConnectionState::Connected));
        assert_eq!(event_json(&status), json!({"event": "status", "connection": "connected"}));

        let audio = Event::Audio(BinaryFrame::audio(vec![0; 8]));
        assert_eq!(event_json(&audio), json!({"event": "audio", "channel": 0, "bytes": 8}));

        let target = Event::TargetResult(normalize_query_result(&QueryResult::success(
            "events",
            json!([{"event_type": "bell", "created_at": "T"}]),
        )));
        let value = event_json(&target);
        assert_eq!(value["event"], "events_query_result");
        assert_eq!(value["data"][0], json!({"event": "bell", "param": 0, "timestamp": "T"}));
    }

    #[tokio::test(start_paused = true)]
    async fn speak_sends_paced_chunks() {
        let session = DeviceSession::new();
        let mut rx = session.attach();
        let audio = AudioSettings {
            sample_rate: 24_000,
            chunk_samples: 240,
        };

        let started = tokio::time::Instant::now();
        let frames = speak(&session, &audio, &[0.5; 600]).await.unwrap();
        assert_eq!(frames, 3);
        // first frame goes out at once, the rest one chunk apart
        assert!(started.elapsed() >= audio.chunk_duration() * 2);

        let mut lengths = Vec::new();
        while let Ok(Message::Binary(bytes)) = rx.try_recv() {
            let frame = decode_frame(&bytes).unwrap();
            assert!(frame.is_audio());
            lengths.push(frame.payload_length());
        }
        assert_eq!(lengths, vec![480, 480, 240]);
    }

    #[tokio::test]
    async fn speak_requires_connection() {
        let session = DeviceSession::new();
        let result = speak(&session, &AudioSettings::default(), &[0.0; 8]).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn watch_stops_during_handshake() {
        // accepts TCP but never answers the WebSocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut config = ClientConfig::default();
        config.device.connect_timeout = 60;
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async {
            let _ = stop_rx.await;
        };

        let topics = ["log".to_string()];
        let watching = watch_until(
            &config,
            &url,
            &topics,
            Arc::new(MemoryStore::new(5)),
            true,
            shutdown,
        );
        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop_tx.send(());
        };
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(watching, stop)
        })
        .await
        .unwrap();
        assert!(result.is_ok());
    }
}
